//! Directory server traits

use async_trait::async_trait;

use wharf_protocol::TaskId;

use crate::error::DirectoryError;
use crate::types::{DnsRecord, ProxyRecord};

/// A record stored in a directory, keyed by the task it routes to
pub trait DirectoryRecord: Clone + Send + Sync + 'static {
    fn task_id(&self) -> &TaskId;
}

impl DirectoryRecord for DnsRecord {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

impl DirectoryRecord for ProxyRecord {
    fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

/// One of the two local routing directories (name resolution, reverse proxy).
///
/// Implementations synchronize internally; every method may be called
/// concurrently with `start`.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Record type held by this directory
    type Record: DirectoryRecord;

    /// Human-readable directory name for logs
    fn name(&self) -> &'static str;

    /// Run the directory server.
    ///
    /// Called once per process. Runs until the server fails; an error
    /// before serving begins (e.g. bind failure) is returned immediately.
    async fn start(&self) -> Result<(), DirectoryError>;

    /// Insert or replace the record for its task
    fn upsert(&self, record: Self::Record);

    /// Remove the record for a task, returning it if present
    fn remove(&self, task_id: &TaskId) -> Option<Self::Record>;

    /// Replace the whole directory content
    fn replace_all(&self, records: Vec<Self::Record>);

    /// Current records, in no particular order
    fn snapshot(&self) -> Vec<Self::Record>;

    /// Record for one task
    fn get(&self, task_id: &TaskId) -> Option<Self::Record>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
