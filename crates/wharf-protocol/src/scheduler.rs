//! Scheduler records as published by the manager
//!
//! These are owned by the manager's scheduler; the agent only reads them.
//! The same types are used for JSON on the manager's HTTP query surface and
//! for bincode inside tunnel frames, so no field may be skipped on
//! serialization.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Application identifier
    AppId
);
string_id!(
    /// Task instance identifier, unique across the cluster
    TaskId
);
string_id!(
    /// Application version identifier
    VersionId
);

/// Health classification reported by the scheduler's health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHealth {
    Healthy,
    Unhealthy,
    /// No health check configured or no result yet
    #[default]
    Unset,
}

/// Runtime status of a task as reported by the cluster resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_KILLING")]
    Killing,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_ERROR")]
    Error,
    #[serde(rename = "TASK_LOST")]
    Lost,
    #[serde(rename = "TASK_DROPPED")]
    Dropped,
    #[serde(rename = "TASK_UNREACHABLE")]
    Unreachable,
    #[serde(rename = "TASK_GONE")]
    Gone,
    #[serde(rename = "TASK_GONE_BY_OPERATOR")]
    GoneByOperator,
    /// Anything this agent does not know about
    #[serde(other, rename = "TASK_UNKNOWN")]
    Unknown,
}

impl TaskStatus {
    /// Health implied by the runtime status alone, used when the scheduler
    /// has no health classification for the task.
    pub fn implied_health(&self) -> TaskHealth {
        match self {
            TaskStatus::Running => TaskHealth::Healthy,
            TaskStatus::Staging
            | TaskStatus::Starting
            | TaskStatus::Killing
            | TaskStatus::Finished
            | TaskStatus::Failed
            | TaskStatus::Killed
            | TaskStatus::Error
            | TaskStatus::Lost
            | TaskStatus::Dropped
            | TaskStatus::Unreachable
            | TaskStatus::Gone
            | TaskStatus::GoneByOperator
            | TaskStatus::Unknown => TaskHealth::Unhealthy,
        }
    }
}

/// One task instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub app_id: AppId,
    /// Version the task was launched from
    pub version_id: VersionId,
    pub ip: String,
    pub port: u16,
    /// Routing weight
    pub weight: f64,
    #[serde(default)]
    pub health: TaskHealth,
    pub status: TaskStatus,
}

/// Gateway exposure settings of an application version
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    #[serde(default)]
    pub alias: String,
}

/// An application version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: VersionId,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
}

impl VersionRecord {
    /// Alias and gateway flag; an absent proxy section disables the gateway
    pub fn gateway(&self) -> (String, bool) {
        match &self.proxy {
            Some(proxy) => (proxy.alias.clone(), proxy.enabled),
            None => (String::new(), false),
        }
    }
}

/// Reference to a task inside an application listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub id: TaskId,
    pub version_id: VersionId,
}

/// Application as listed by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSummary {
    pub id: AppId,
    #[serde(default)]
    pub tasks: Vec<TaskRef>,
}
