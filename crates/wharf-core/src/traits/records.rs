//! Record derivation

use crate::types::{DnsRecord, ProxyRecord, TaskEvent};

/// Derives directory records from a task event.
///
/// Returning `None` means the directory should hold no entry for the task.
pub trait RecordBuilder: Send + Sync {
    fn proxy_record(&self, event: &TaskEvent) -> Option<ProxyRecord>;

    fn dns_record(&self, event: &TaskEvent) -> Option<DnsRecord>;
}

/// Builder used by the agent binary.
///
/// Proxy records exist only for gateway-enabled versions; DNS records exist
/// for every task with an address, named `<app>.<domain>`.
#[derive(Debug, Clone)]
pub struct DefaultRecordBuilder {
    domain: String,
}

impl DefaultRecordBuilder {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into().trim_matches('.').to_string(),
        }
    }
}

impl RecordBuilder for DefaultRecordBuilder {
    fn proxy_record(&self, event: &TaskEvent) -> Option<ProxyRecord> {
        if !event.gateway_enabled || event.ip.is_empty() {
            return None;
        }

        Some(ProxyRecord {
            task_id: event.task_id.clone(),
            app_id: event.app_id.clone(),
            alias: event.app_alias.clone(),
            ip: event.ip.clone(),
            port: event.port,
            weight: event.weight,
        })
    }

    fn dns_record(&self, event: &TaskEvent) -> Option<DnsRecord> {
        if event.ip.is_empty() {
            return None;
        }

        Some(DnsRecord {
            task_id: event.task_id.clone(),
            app_id: event.app_id.clone(),
            name: format!("{}.{}", event.app_id, self.domain),
            ip: event.ip.clone(),
            port: event.port,
            weight: event.weight,
        })
    }
}
