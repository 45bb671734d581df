//! Agent supervisor
//!
//! Drives the agent through its phases:
//!
//! ```text
//! Detecting ──► Joining ──► FullSyncing ──► Serving
//!     ▲            │             │             │
//!     └────────────┴─────────────┴─────────────┘
//! ```
//!
//! A failure in discovery, join or full sync waits out the backoff and
//! returns to discovery. A session that stops serving returns to discovery
//! straight away. The directory servers are started after the first full
//! sync and outlive every session; if one of them stops, the supervisor
//! returns a fatal error.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use wharf_core::config::AgentConfig;
use wharf_core::traits::{Directory, DirectoryRecord, RecordBuilder};
use wharf_core::{DirectoryError, ManagerAddr, QueryError};

use crate::api::{ApiError, LocalApi};
use crate::directory::Directories;
use crate::locator::{LocatorError, ManagerLocator};
use crate::sync::{HttpManagerClient, ServiceDirectorySync, SyncError};
use crate::tunnel::{ClusterSession, ExponentialBackoff, JoinOptions, SessionError, TaskChangeHandler};

/// Observable supervisor phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Detecting,
    Joining,
    FullSyncing,
    Serving,
    /// `run` has returned
    Stopped,
}

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Discovery failed: {0}")]
    Discovery(#[from] LocatorError),

    #[error("Join failed: {0}")]
    Join(#[from] SessionError),

    #[error("Full sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Manager client error: {0}")]
    Query(#[from] QueryError),

    /// A directory server failed; the agent cannot continue
    #[error("Directory server failed: {0}")]
    Directory(#[from] DirectoryError),
}

impl AgentError {
    /// Whether the agent must stop instead of rejoining
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Directory(_))
    }
}

enum State {
    Detecting,
    Joining(ManagerAddr),
    FullSyncing(ClusterSession),
    Serving(ClusterSession),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Detecting => Phase::Detecting,
            State::Joining(_) => Phase::Joining,
            State::FullSyncing(_) => Phase::FullSyncing,
            State::Serving(_) => Phase::Serving,
        }
    }
}

enum LoopExit {
    Protocol(Result<(), SessionError>),
    Api(Result<(), ApiError>),
}

/// Keeps the agent joined to the cluster
pub struct AgentSupervisor {
    config: AgentConfig,
    join: JoinOptions,
    locator: ManagerLocator,
    sync: Arc<ServiceDirectorySync>,
    api: LocalApi,
    phase_tx: watch::Sender<Phase>,
}

impl AgentSupervisor {
    pub fn new(
        config: AgentConfig,
        directories: Directories,
        builder: Arc<dyn RecordBuilder>,
    ) -> Result<Self, AgentError> {
        let locator = ManagerLocator::new(config.probe_timeout)?;
        let join = JoinOptions::from_config(&config);
        let api = LocalApi::new(
            &join.agent_id,
            directories.clone(),
            config.container_socket.clone(),
        );
        let sync = Arc::new(ServiceDirectorySync::new(directories, builder));
        let (phase_tx, _) = watch::channel(Phase::Detecting);

        Ok(Self {
            config,
            join,
            locator,
            sync,
            api,
            phase_tx,
        })
    }

    /// Subscribe to phase changes
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn directories(&self) -> &Directories {
        self.sync.directories()
    }

    /// Run until `shutdown` fires or a directory server fails.
    ///
    /// Only a directory failure is returned as an error; every other
    /// failure is retried.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let (fatal_tx, mut fatal_rx) = mpsc::channel(2);

        let result = tokio::select! {
            () = self.drive(fatal_tx, &shutdown) => Ok(()),
            Some(e) = fatal_rx.recv() => Err(AgentError::Directory(e)),
            _ = shutdown.cancelled() => {
                tracing::info!("Agent shutting down");
                Ok(())
            }
        };

        self.phase_tx.send_replace(Phase::Stopped);
        result
    }

    async fn drive(&self, fatal_tx: mpsc::Sender<DirectoryError>, shutdown: &CancellationToken) {
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);
        let mut servers: Option<JoinSet<()>> = None;
        let mut state = State::Detecting;

        loop {
            self.phase_tx.send_replace(state.phase());

            state = match state {
                State::Detecting => match self.locator.detect(&self.config.join_addrs).await {
                    Ok(manager) => State::Joining(manager),
                    Err(e) => {
                        self.retry_later(&mut backoff, e.into()).await;
                        State::Detecting
                    }
                },

                State::Joining(manager) => match ClusterSession::join(manager, &self.join).await {
                    Ok(session) => {
                        backoff.reset();
                        State::FullSyncing(session)
                    }
                    Err(e) => {
                        self.retry_later(&mut backoff, e.into()).await;
                        State::Detecting
                    }
                },

                State::FullSyncing(session) => {
                    let synced = self.full_sync(session.manager()).await;
                    match synced {
                        Ok(()) => State::Serving(session),
                        Err(e) => {
                            drop(session);
                            self.retry_later(&mut backoff, e).await;
                            State::Detecting
                        }
                    }
                }

                State::Serving(session) => {
                    if servers.is_none() {
                        servers = Some(self.start_directories(&fatal_tx));
                    }
                    self.serve(session, shutdown).await;
                    State::Detecting
                }
            };
        }
    }

    async fn retry_later(&self, backoff: &mut ExponentialBackoff, error: AgentError) {
        let delay = backoff.next_delay();
        tracing::error!("Agent join error: {}", error);
        tracing::warn!("Agent rejoin in {:?}", delay);
        tokio::time::sleep(delay).await;
    }

    async fn full_sync(&self, manager: &ManagerAddr) -> Result<(), AgentError> {
        let client = HttpManagerClient::new(manager.clone(), self.config.connect_timeout)?;
        let result = self.sync.full_sync(&client).await?;
        self.sync.apply_full(&result);

        tracing::info!(
            "Full sync from {}: {} task(s), {} healthy, {} skipped",
            manager,
            result.events.len(),
            result.healthy(),
            result.skipped.len()
        );
        Ok(())
    }

    fn start_directories(&self, fatal_tx: &mpsc::Sender<DirectoryError>) -> JoinSet<()> {
        let directories = self.sync.directories();
        let mut servers = JoinSet::new();
        spawn_directory(&mut servers, directories.dns.clone(), fatal_tx.clone());
        spawn_directory(&mut servers, directories.proxy.clone(), fatal_tx.clone());
        servers
    }

    /// Run both session loops; whichever ends first takes the other down
    async fn serve(&self, session: ClusterSession, shutdown: &CancellationToken) {
        let manager = session.manager().clone();
        let (protocol, listener) = session.split();
        let cancel = shutdown.child_token();
        let handler: Arc<dyn TaskChangeHandler> = self.sync.clone();

        let mut loops = JoinSet::new();
        let protocol_cancel = cancel.clone();
        loops.spawn(async move { LoopExit::Protocol(protocol.serve(handler, protocol_cancel).await) });
        let api = self.api.clone();
        let api_cancel = cancel.clone();
        loops.spawn(async move { LoopExit::Api(api.serve(listener, api_cancel).await) });

        tracing::info!("Agent joined {}, serving", manager);

        let first = loops.join_next().await;
        cancel.cancel();
        report_exit(first);
        while let Some(rest) = loops.join_next().await {
            report_exit(Some(rest));
        }

        tracing::warn!("Session with {} ended", manager);
    }
}

fn spawn_directory<R: DirectoryRecord>(
    servers: &mut JoinSet<()>,
    directory: Arc<dyn Directory<Record = R>>,
    fatal_tx: mpsc::Sender<DirectoryError>,
) {
    servers.spawn(async move {
        let name = directory.name();
        let error = match directory.start().await {
            Ok(()) => DirectoryError::Stopped {
                name,
                message: "server exited".to_string(),
            },
            Err(e) => e,
        };
        tracing::error!("{}", error);
        let _ = fatal_tx.send(error).await;
    });
}

fn report_exit(exit: Option<Result<LoopExit, JoinError>>) {
    match exit {
        Some(Ok(LoopExit::Protocol(Err(e)))) => {
            tracing::error!("Agent protocol loop failed: {}", e)
        }
        Some(Ok(LoopExit::Api(Err(e)))) => tracing::error!("Agent API loop failed: {}", e),
        Some(Ok(LoopExit::Protocol(Ok(())))) => tracing::debug!("Agent protocol loop stopped"),
        Some(Ok(LoopExit::Api(Ok(())))) => tracing::debug!("Agent API loop stopped"),
        Some(Err(e)) => tracing::error!("Agent session task failed: {}", e),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RecordDirectory;
    use std::time::Duration;
    use wharf_core::traits::DefaultRecordBuilder;

    fn closed_port() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn supervisor(config: AgentConfig) -> AgentSupervisor {
        let directories = Directories {
            dns: Arc::new(RecordDirectory::new("dns", "127.0.0.1:0", None)),
            proxy: Arc::new(RecordDirectory::new("gateway", "127.0.0.1:0", None)),
        };
        AgentSupervisor::new(
            config,
            directories,
            Arc::new(DefaultRecordBuilder::new("wharf.local")),
        )
        .unwrap()
    }

    #[test]
    fn test_only_directory_errors_are_fatal() {
        let fatal = AgentError::Directory(DirectoryError::Stopped {
            name: "dns",
            message: "gone".to_string(),
        });
        assert!(fatal.is_fatal());
        assert!(!AgentError::Discovery(LocatorError::Unavailable { tried: 2 }).is_fatal());
        assert!(!AgentError::Join(SessionError::Closed).is_fatal());
    }

    #[tokio::test]
    async fn test_keeps_detecting_without_manager() {
        let config = AgentConfig {
            join_addrs: vec![closed_port(), closed_port()],
            probe_timeout: Duration::from_millis(500),
            ..AgentConfig::default()
        };
        let supervisor = Arc::new(supervisor(config));
        let mut phase = supervisor.phase();
        let shutdown = CancellationToken::new();

        let runner = {
            let supervisor = supervisor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { supervisor.run(shutdown).await })
        };

        // First failure backs off for a second; the agent never gets past discovery
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*phase.borrow_and_update(), Phase::Detecting);

        shutdown.cancel();
        assert!(runner.await.unwrap().is_ok());
        phase.changed().await.unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
    }
}
