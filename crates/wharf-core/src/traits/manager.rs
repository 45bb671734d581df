//! Manager query surface

use async_trait::async_trait;

use wharf_protocol::{AppId, AppSummary, TaskId, TaskRecord, VersionId, VersionRecord};

use crate::error::QueryError;

/// Read-only view of the scheduler's authoritative state, used during full
/// sync.
#[async_trait]
pub trait ManagerQuery: Send + Sync {
    /// Every application with the tasks it currently owns
    async fn list_apps(&self) -> Result<Vec<AppSummary>, QueryError>;

    /// Full record of one task
    async fn get_task(&self, app_id: &AppId, task_id: &TaskId) -> Result<TaskRecord, QueryError>;

    /// One application version
    async fn get_version(
        &self,
        app_id: &AppId,
        version_id: &VersionId,
    ) -> Result<VersionRecord, QueryError>;
}
