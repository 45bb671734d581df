//! Core domain types
//!
//! A [`TaskEvent`] is the directory-facing view of one scheduler task. It is
//! derived the same way whether it comes from a full sync or from an
//! incremental push, and it is what the record builders consume.

use serde::{Deserialize, Serialize};
use std::fmt;

use wharf_protocol::{AppId, TaskHealth, TaskId, TaskRecord, TaskStatus, VersionRecord};

use crate::traits::RecordBuilder;

/// Address of a manager that answered a liveness probe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerAddr {
    authority: String,
}

impl ManagerAddr {
    /// Wrap a `host:port` candidate
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }

    /// The `host:port` part
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute URL for a path on the manager's HTTP surface
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.authority, path)
    }
}

impl fmt::Display for ManagerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority)
    }
}

/// Two-valued health used for routing decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    TaskHealthy,
    TaskUnhealthy,
}

impl TaskEventKind {
    /// Collapse the scheduler's health classification and runtime status.
    ///
    /// An explicit classification wins; `Unset` falls back to the health
    /// implied by the runtime status.
    pub fn collapse(health: TaskHealth, status: TaskStatus) -> Self {
        let effective = match health {
            TaskHealth::Unset => status.implied_health(),
            other => other,
        };
        match effective {
            TaskHealth::Healthy => TaskEventKind::TaskHealthy,
            TaskHealth::Unhealthy | TaskHealth::Unset => TaskEventKind::TaskUnhealthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self == TaskEventKind::TaskHealthy
    }
}

/// Flattened, directory-facing view of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub app_id: AppId,
    pub app_alias: String,
    pub task_id: TaskId,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub gateway_enabled: bool,
}

impl TaskEvent {
    /// Build the event for a task and its owning version.
    ///
    /// Without a version record the task gets no alias and no gateway
    /// exposure.
    pub fn from_task(task: &TaskRecord, version: Option<&VersionRecord>) -> Self {
        let (app_alias, gateway_enabled) = version.map(VersionRecord::gateway).unwrap_or_default();

        Self {
            kind: TaskEventKind::collapse(task.health, task.status),
            app_id: task.app_id.clone(),
            app_alias,
            task_id: task.id.clone(),
            ip: task.ip.clone(),
            port: task.port,
            weight: task.weight,
            gateway_enabled,
        }
    }

    /// Event for a task the scheduler no longer reports
    pub fn removed(app_id: AppId, task_id: TaskId) -> Self {
        Self {
            kind: TaskEventKind::TaskUnhealthy,
            app_id,
            app_alias: String::new(),
            task_id,
            ip: String::new(),
            port: 0,
            weight: 0.0,
            gateway_enabled: false,
        }
    }
}

/// Reverse-proxy routing entry for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub task_id: TaskId,
    pub app_id: AppId,
    /// Public alias the gateway matches on
    pub alias: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
}

/// Name-resolution entry for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub task_id: TaskId,
    pub app_id: AppId,
    /// Fully qualified name the record answers for
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
}

/// Unit exchanged between the sync pipeline and the two directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDirectoryEvent {
    pub event: TaskEvent,
    /// `None` when the builder declined (e.g. gateway disabled)
    pub proxy: Option<ProxyRecord>,
    /// `None` when the builder declined
    pub dns: Option<DnsRecord>,
}

impl CombinedDirectoryEvent {
    /// Run both record derivations for an event
    pub fn derive(event: TaskEvent, builder: &dyn RecordBuilder) -> Self {
        let proxy = builder.proxy_record(&event);
        let dns = builder.dns_record(&event);
        Self { event, proxy, dns }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.event.task_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wharf_protocol::{ProxyConfig, VersionId};

    fn task(health: TaskHealth, status: TaskStatus) -> TaskRecord {
        TaskRecord {
            id: TaskId::new("1-web"),
            app_id: AppId::new("web"),
            version_id: VersionId::new("v1"),
            ip: "10.0.0.9".to_string(),
            port: 8080,
            weight: 10.0,
            health,
            status,
        }
    }

    #[test]
    fn test_health_collapse() {
        use TaskEventKind::*;

        assert_eq!(TaskEventKind::collapse(TaskHealth::Unset, TaskStatus::Running), TaskHealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Unset, TaskStatus::Staging), TaskUnhealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Unset, TaskStatus::Killed), TaskUnhealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Healthy, TaskStatus::Running), TaskHealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Healthy, TaskStatus::Failed), TaskHealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Unhealthy, TaskStatus::Running), TaskUnhealthy);
        assert_eq!(TaskEventKind::collapse(TaskHealth::Unhealthy, TaskStatus::Lost), TaskUnhealthy);
    }

    #[test]
    fn test_from_task_copies_version_gateway() {
        let version = VersionRecord {
            id: VersionId::new("v1"),
            proxy: Some(ProxyConfig {
                enabled: true,
                alias: "www.example.com".to_string(),
            }),
        };
        let event = TaskEvent::from_task(&task(TaskHealth::Unset, TaskStatus::Running), Some(&version));

        assert_eq!(event.kind, TaskEventKind::TaskHealthy);
        assert_eq!(event.app_alias, "www.example.com");
        assert!(event.gateway_enabled);
        assert_eq!(event.ip, "10.0.0.9");
        assert_eq!(event.port, 8080);
    }

    #[test]
    fn test_from_task_without_version() {
        let event = TaskEvent::from_task(&task(TaskHealth::Healthy, TaskStatus::Running), None);
        assert!(!event.gateway_enabled);
        assert!(event.app_alias.is_empty());
    }

    #[test]
    fn test_manager_addr_urls() {
        let addr = ManagerAddr::new("10.0.0.1:9999");
        assert_eq!(addr.url("/ping"), "http://10.0.0.1:9999/ping");
        assert_eq!(addr.to_string(), "10.0.0.1:9999");
    }
}
