//! HTTP client for the manager's query surface

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;

use wharf_core::traits::ManagerQuery;
use wharf_core::{ManagerAddr, QueryError};
use wharf_protocol::{AppId, AppSummary, TaskId, TaskRecord, VersionId, VersionRecord};

/// [`ManagerQuery`] over the manager's JSON HTTP API
#[derive(Debug, Clone)]
pub struct HttpManagerClient {
    client: reqwest::Client,
    manager: ManagerAddr,
}

impl HttpManagerClient {
    pub fn new(manager: ManagerAddr, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;
        Ok(Self { client, manager })
    }

    /// URL of `segments` on the manager, each one percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, QueryError> {
        let invalid = |message: String| {
            QueryError::Unreachable(format!("invalid manager address {}: {}", self.manager, message))
        };
        let mut url = Url::parse(&self.manager.url("/")).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot carry a path".to_string()))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, QueryError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| QueryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status {
                path,
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| QueryError::Decode {
            path,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ManagerQuery for HttpManagerClient {
    async fn list_apps(&self) -> Result<Vec<AppSummary>, QueryError> {
        self.get_json(&["v1", "apps"]).await
    }

    async fn get_task(&self, app_id: &AppId, task_id: &TaskId) -> Result<TaskRecord, QueryError> {
        self.get_json(&["v1", "apps", app_id.as_str(), "tasks", task_id.as_str()])
            .await
    }

    async fn get_version(
        &self,
        app_id: &AppId,
        version_id: &VersionId,
    ) -> Result<VersionRecord, QueryError> {
        self.get_json(&[
            "v1",
            "apps",
            app_id.as_str(),
            "versions",
            version_id.as_str(),
        ])
        .await
    }
}
