//! Service directory synchronization
//!
//! On every join the agent rebuilds both directories from the manager's
//! authoritative state (full sync). While the session is serving, task
//! changes pushed over the tunnel are applied one by one. Both paths derive
//! records through the same [`RecordBuilder`], and applying the same event
//! twice leaves the directories unchanged.

mod manager;

pub use manager::HttpManagerClient;

use std::sync::Arc;

use thiserror::Error;

use wharf_core::traits::{ManagerQuery, RecordBuilder};
use wharf_core::{CombinedDirectoryEvent, QueryError, TaskEvent};
use wharf_protocol::{AppId, TaskId};

use crate::directory::Directories;
use crate::tunnel::{TaskChange, TaskChangeHandler};

/// Full sync failures
#[derive(Debug, Error)]
pub enum SyncError {
    /// The application listing could not be fetched
    #[error("Failed to list applications: {0}")]
    ListApps(#[source] QueryError),

    /// The manager stopped answering partway through
    #[error("Manager unreachable while loading task {task_id} of {app_id}: {source}")]
    Unreachable {
        app_id: AppId,
        task_id: TaskId,
        #[source]
        source: QueryError,
    },
}

/// A task left out of a full sync because its records could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTask {
    pub app_id: AppId,
    pub task_id: TaskId,
    pub reason: String,
}

/// Result of a full sync
#[derive(Debug, Default)]
pub struct FullSync {
    /// One event per task that could be loaded, healthy or not
    pub events: Vec<CombinedDirectoryEvent>,
    /// Tasks that could not be loaded
    pub skipped: Vec<SkippedTask>,
}

impl FullSync {
    pub fn healthy(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.event.kind.is_healthy())
            .count()
    }
}

/// Keeps the two directories in line with the scheduler
pub struct ServiceDirectorySync {
    directories: Directories,
    builder: Arc<dyn RecordBuilder>,
}

impl ServiceDirectorySync {
    pub fn new(directories: Directories, builder: Arc<dyn RecordBuilder>) -> Self {
        Self {
            directories,
            builder,
        }
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    /// Collect one event per task from the manager's query surface.
    ///
    /// Fails when the application listing fails or the manager stops
    /// answering altogether. A task whose record or version is refused or
    /// malformed is logged and reported in [`FullSync::skipped`].
    pub async fn full_sync(&self, manager: &dyn ManagerQuery) -> Result<FullSync, SyncError> {
        let apps = manager.list_apps().await.map_err(SyncError::ListApps)?;

        let mut result = FullSync::default();
        for app in apps {
            for task_ref in app.tasks {
                let task = match manager.get_task(&app.id, &task_ref.id).await {
                    Ok(task) => task,
                    Err(source @ QueryError::Unreachable(_)) => {
                        return Err(SyncError::Unreachable {
                            app_id: app.id,
                            task_id: task_ref.id,
                            source,
                        })
                    }
                    Err(e) => {
                        tracing::error!("Failed to load task {} of {}: {}", task_ref.id, app.id, e);
                        result.skipped.push(SkippedTask {
                            app_id: app.id.clone(),
                            task_id: task_ref.id,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let version = match manager.get_version(&app.id, &task.version_id).await {
                    Ok(version) => version,
                    Err(source @ QueryError::Unreachable(_)) => {
                        return Err(SyncError::Unreachable {
                            app_id: app.id,
                            task_id: task.id,
                            source,
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to load version {} for task {}: {}",
                            task.version_id,
                            task.id,
                            e
                        );
                        result.skipped.push(SkippedTask {
                            app_id: app.id.clone(),
                            task_id: task.id,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let event = TaskEvent::from_task(&task, Some(&version));
                result.events.push(self.derive(event));
            }
        }

        Ok(result)
    }

    /// Replace both directories with the outcome of a full sync.
    ///
    /// Skipped tasks are still listed by the manager, so whatever the
    /// directories already hold for them is kept.
    pub fn apply_full(&self, sync: &FullSync) {
        let healthy = || sync.events.iter().filter(|e| e.event.kind.is_healthy());

        let mut dns: Vec<_> = healthy().filter_map(|e| e.dns.clone()).collect();
        let mut proxy: Vec<_> = healthy().filter_map(|e| e.proxy.clone()).collect();
        for skipped in &sync.skipped {
            dns.extend(self.directories.dns.get(&skipped.task_id));
            proxy.extend(self.directories.proxy.get(&skipped.task_id));
        }

        self.directories.dns.replace_all(dns);
        self.directories.proxy.replace_all(proxy);
    }

    /// Apply one event to both directories.
    ///
    /// A healthy event upserts whatever records were derived and removes the
    /// ones that were declined; an unhealthy event removes both.
    pub fn apply(&self, event: &CombinedDirectoryEvent) {
        let task_id = event.task_id();

        if !event.event.kind.is_healthy() {
            self.directories.dns.remove(task_id);
            self.directories.proxy.remove(task_id);
            tracing::debug!("Task {} of {} removed from directories", task_id, event.event.app_id);
            return;
        }

        match &event.dns {
            Some(record) => self.directories.dns.upsert(record.clone()),
            None => {
                self.directories.dns.remove(task_id);
            }
        }
        match &event.proxy {
            Some(record) => self.directories.proxy.upsert(record.clone()),
            None => {
                self.directories.proxy.remove(task_id);
            }
        }
        tracing::debug!("Task {} of {} routed", task_id, event.event.app_id);
    }

    /// Run the record builder over an event
    pub fn derive(&self, event: TaskEvent) -> CombinedDirectoryEvent {
        CombinedDirectoryEvent::derive(event, self.builder.as_ref())
    }
}

impl TaskChangeHandler for ServiceDirectorySync {
    fn on_task_change(&self, change: TaskChange) {
        let event = match change {
            TaskChange::Updated { task, version } => TaskEvent::from_task(&task, version.as_ref()),
            TaskChange::Removed { app_id, task_id } => TaskEvent::removed(app_id, task_id),
        };
        self.apply(&self.derive(event));
    }
}
