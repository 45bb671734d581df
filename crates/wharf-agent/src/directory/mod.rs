//! Local routing directories
//!
//! Both directories (name resolution and reverse proxy) are the same
//! concurrent record table keyed by task id, differing only in record type
//! and in the address their server binds. The server exposes a read-only
//! JSON view of the table for the resolver and gateway processes on the
//! host.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Serialize;
use tokio::net::TcpListener;

use wharf_core::config::{AgentConfig, DnsConfig, GatewayConfig};
use wharf_core::traits::{Directory, DirectoryRecord};
use wharf_core::{DirectoryError, DnsRecord, ProxyRecord};
use wharf_protocol::TaskId;

/// The pair of directories the sync pipeline writes to
#[derive(Clone)]
pub struct Directories {
    pub dns: Arc<dyn Directory<Record = DnsRecord>>,
    pub proxy: Arc<dyn Directory<Record = ProxyRecord>>,
}

impl Directories {
    /// Directories backed by [`RecordDirectory`] servers
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            dns: Arc::new(RecordDirectory::dns(&config.dns, config.gateway.advertise_ip)),
            proxy: Arc::new(RecordDirectory::gateway(&config.gateway)),
        }
    }
}

/// JSON view served by a directory
#[derive(Debug, Serialize)]
pub struct DirectoryView<R> {
    pub name: &'static str,
    pub advertise_ip: Option<IpAddr>,
    pub records: Vec<R>,
}

struct Inner<R> {
    name: &'static str,
    listen_addr: String,
    advertise_ip: Option<IpAddr>,
    records: DashMap<TaskId, R>,
    bound: OnceLock<SocketAddr>,
}

impl<R: DirectoryRecord> Inner<R> {
    fn view(&self) -> DirectoryView<R> {
        let mut records: Vec<R> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.task_id().cmp(b.task_id()));
        DirectoryView {
            name: self.name,
            advertise_ip: self.advertise_ip,
            records,
        }
    }
}

/// Concurrent record table with an HTTP view
pub struct RecordDirectory<R> {
    inner: Arc<Inner<R>>,
}

impl<R: DirectoryRecord> RecordDirectory<R> {
    pub fn new(name: &'static str, listen_addr: impl Into<String>, advertise_ip: Option<IpAddr>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                listen_addr: listen_addr.into(),
                advertise_ip,
                records: DashMap::new(),
                bound: OnceLock::new(),
            }),
        }
    }

    /// Address the server actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.bound.get().copied()
    }

    /// Current content as served over HTTP
    pub fn view(&self) -> DirectoryView<R> {
        self.inner.view()
    }
}

impl RecordDirectory<DnsRecord> {
    /// Name-resolution directory; aliases resolve to `advertise_ip` when set
    pub fn dns(config: &DnsConfig, advertise_ip: Option<IpAddr>) -> Self {
        Self::new("dns", config.listen_addr.clone(), advertise_ip)
    }
}

impl RecordDirectory<ProxyRecord> {
    pub fn gateway(config: &GatewayConfig) -> Self {
        Self::new("gateway", config.listen_addr.clone(), config.advertise_ip)
    }
}

async fn list_records<R>(State(inner): State<Arc<Inner<R>>>) -> Json<DirectoryView<R>>
where
    R: DirectoryRecord + Serialize,
{
    Json(inner.view())
}

#[async_trait]
impl<R> Directory for RecordDirectory<R>
where
    R: DirectoryRecord + Serialize,
{
    type Record = R;

    fn name(&self) -> &'static str {
        self.inner.name
    }

    async fn start(&self) -> Result<(), DirectoryError> {
        let name = self.inner.name;
        let listener = TcpListener::bind(&self.inner.listen_addr)
            .await
            .map_err(|source| DirectoryError::Bind {
                name,
                addr: self.inner.listen_addr.clone(),
                source,
            })?;

        if let Ok(addr) = listener.local_addr() {
            let _ = self.inner.bound.set(addr);
            tracing::info!("{} directory listening on {}", name, addr);
        }

        let app = Router::new()
            .route("/v1/records", get(list_records::<R>))
            .with_state(self.inner.clone());

        axum::serve(listener, app)
            .await
            .map_err(|e| DirectoryError::Stopped {
                name,
                message: e.to_string(),
            })
    }

    fn upsert(&self, record: R) {
        self.inner.records.insert(record.task_id().clone(), record);
    }

    fn remove(&self, task_id: &TaskId) -> Option<R> {
        self.inner.records.remove(task_id).map(|(_, record)| record)
    }

    fn replace_all(&self, records: Vec<R>) {
        // Never empty the table while it is being refilled
        let keep: std::collections::HashSet<TaskId> =
            records.iter().map(|r| r.task_id().clone()).collect();
        self.inner.records.retain(|task_id, _| keep.contains(task_id));
        for record in records {
            self.upsert(record);
        }
    }

    fn snapshot(&self) -> Vec<R> {
        self.inner.view().records
    }

    fn get(&self, task_id: &TaskId) -> Option<R> {
        self.inner.records.get(task_id).map(|e| e.value().clone())
    }

    fn len(&self) -> usize {
        self.inner.records.len()
    }
}
