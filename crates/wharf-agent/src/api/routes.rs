//! Router for the agent's HTTP endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use wharf_core::{DnsRecord, ProxyRecord};

use super::sysinfo::SystemInfo;
use crate::directory::Directories;

#[derive(Clone)]
pub(crate) struct ApiState {
    pub agent_id: Arc<str>,
    pub directories: Directories,
}

#[derive(Debug, Serialize)]
struct RecordsResponse {
    dns: Vec<DnsRecord>,
    proxy: Vec<ProxyRecord>,
}

pub(crate) fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/sysinfo", get(sysinfo))
        .route("/v1/records", get(records))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn sysinfo(
    State(state): State<ApiState>,
) -> Result<Json<SystemInfo>, (StatusCode, String)> {
    SystemInfo::gather(state.agent_id.to_string())
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to gather system info: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

async fn records(State(state): State<ApiState>) -> Json<RecordsResponse> {
    Json(RecordsResponse {
        dns: state.directories.dns.snapshot(),
        proxy: state.directories.proxy.snapshot(),
    })
}
