//! Tunnel protocol loop
//!
//! Runs for the lifetime of one cluster session. The control stream
//! carries heartbeats and scheduler change notifications; every other
//! stream id is a connection the manager forwards to the local API.
//!
//! Each forwarded stream gets an in-memory duplex pipe. One end goes to the
//! [`TunnelListener`](super::TunnelListener); the other is pumped by a task
//! that turns local writes into `Data` frames and manager `Data` frames into
//! local reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use wharf_core::ManagerAddr;
use wharf_protocol::{
    AppId, ErrorCode, Frame, Message, StreamId, TaskId, TaskRecord, VersionRecord,
};

use super::listener::TunnelStream;
use super::session::{SessionError, TunnelFramed};

/// Frames queued by stream pumps for the tunnel writer
const OUTBOUND_CAPACITY: usize = 256;

/// In-memory buffer between a forwarded stream and its pump
const STREAM_BUFFER: usize = 64 * 1024;

/// Largest `Data` payload produced from one local read
const READ_CHUNK: usize = 16 * 1024;

/// `Data` frames queued for a forwarded stream whose reader has stalled
const STREAM_QUEUE: usize = 64;

/// A scheduler change pushed by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    /// Task created or changed state
    Updated {
        task: TaskRecord,
        version: Option<VersionRecord>,
    },
    /// Task no longer exists
    Removed { app_id: AppId, task_id: TaskId },
}

/// Receives scheduler changes as they arrive on the control stream
pub trait TaskChangeHandler: Send + Sync {
    fn on_task_change(&self, change: TaskChange);
}

/// Protocol side of a cluster session
pub struct ProtocolLoop {
    manager: ManagerAddr,
    framed: TunnelFramed,
    accept_tx: mpsc::Sender<TunnelStream>,
    heartbeat_timeout: Duration,
}

impl ProtocolLoop {
    pub(crate) fn new(
        manager: ManagerAddr,
        framed: TunnelFramed,
        accept_tx: mpsc::Sender<TunnelStream>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            framed,
            accept_tx,
            heartbeat_timeout,
        }
    }

    pub fn manager(&self) -> &ManagerAddr {
        &self.manager
    }

    /// Serve the tunnel until it fails or `cancel` fires.
    ///
    /// Cancellation returns `Ok(())`; anything else ending the loop is an
    /// error. Either way the tunnel connection, the stream listener and all
    /// forwarded streams are closed on return.
    pub async fn serve(
        self,
        handler: Arc<dyn TaskChangeHandler>,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        let ProtocolLoop {
            manager,
            mut framed,
            accept_tx,
            heartbeat_timeout,
        } = self;

        let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut streams = StreamTable {
            inbound: HashMap::new(),
            pumps: JoinSet::new(),
            outbound_tx,
            accept_tx,
        };

        let idle = tokio::time::sleep(heartbeat_timeout);
        tokio::pin!(idle);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                _ = &mut idle => break Err(SessionError::HeartbeatTimeout(heartbeat_timeout)),

                incoming = framed.next() => {
                    let frame = match incoming {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => break Err(e.into()),
                        None => break Err(SessionError::Closed),
                    };
                    idle.as_mut().reset(Instant::now() + heartbeat_timeout);

                    if let Err(e) = streams.dispatch(frame, &mut framed, handler.as_ref()).await {
                        break Err(e);
                    }
                }

                Some(frame) = outbound_rx.recv() => {
                    if matches!(frame.message, Message::StreamClose) {
                        streams.inbound.remove(&frame.stream_id);
                    }
                    if let Err(e) = framed.send(frame).await {
                        break Err(e.into());
                    }
                }

                Some(_) = streams.pumps.join_next(), if !streams.pumps.is_empty() => {}
            }
        };

        match &result {
            Ok(()) => tracing::debug!("Protocol loop with {} cancelled", manager),
            Err(e) => tracing::warn!("Protocol loop with {} ended: {}", manager, e),
        }
        result
    }
}

/// Forwarded streams of one session
struct StreamTable {
    inbound: HashMap<StreamId, mpsc::Sender<Bytes>>,
    pumps: JoinSet<()>,
    outbound_tx: mpsc::Sender<Frame>,
    accept_tx: mpsc::Sender<TunnelStream>,
}

impl StreamTable {
    async fn dispatch(
        &mut self,
        frame: Frame,
        framed: &mut TunnelFramed,
        handler: &dyn TaskChangeHandler,
    ) -> Result<(), SessionError> {
        let id = frame.stream_id;
        if id.is_control() {
            return on_control(frame.message, framed, handler).await;
        }

        match frame.message {
            Message::StreamOpen => self.open(id).await,
            Message::Data(data) => {
                match self.inbound.get(&id).map(|tx| tx.try_send(data)) {
                    Some(Ok(())) => {}
                    Some(Err(TrySendError::Closed(_))) => {
                        self.inbound.remove(&id);
                    }
                    Some(Err(TrySendError::Full(_))) => {
                        tracing::warn!("{} is not draining, dropping it", id);
                        self.inbound.remove(&id);
                        let error = Message::Error {
                            code: ErrorCode::StreamOverflow,
                            message: format!("{} exceeded {} queued frames", id, STREAM_QUEUE),
                        };
                        framed.send(Frame::new(id, error)).await?;
                    }
                    None => {
                        tracing::debug!("Data for unknown {}", id);
                        let error = Message::Error {
                            code: ErrorCode::StreamNotFound,
                            message: format!("{} is not open", id),
                        };
                        framed.send(Frame::new(id, error)).await?;
                    }
                }
                Ok(())
            }
            Message::StreamClose => {
                if self.inbound.remove(&id).is_some() {
                    tracing::debug!("Manager closed {}", id);
                }
                Ok(())
            }
            Message::Error { code, message } => {
                tracing::warn!("Manager reported {:?} on {}: {}", code, id, message);
                self.inbound.remove(&id);
                Ok(())
            }
            other => {
                tracing::warn!("Ignoring {:?} on {}", other.message_type(), id);
                Ok(())
            }
        }
    }

    async fn open(&mut self, id: StreamId) -> Result<(), SessionError> {
        if self.inbound.contains_key(&id) {
            tracing::warn!("Manager reopened live {}", id);
            return Ok(());
        }

        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        let (tx, rx) = mpsc::channel(STREAM_QUEUE);
        self.inbound.insert(id, tx);
        self.pumps
            .spawn(pump(id, remote, rx, self.outbound_tx.clone()));

        tracing::debug!("Manager opened {}", id);
        self.accept_tx
            .send(TunnelStream::new(id, local))
            .await
            .map_err(|_| SessionError::ListenerGone)
    }
}

async fn on_control(
    message: Message,
    framed: &mut TunnelFramed,
    handler: &dyn TaskChangeHandler,
) -> Result<(), SessionError> {
    match message {
        Message::Heartbeat { timestamp } => {
            framed
                .send(Frame::control(Message::HeartbeatAck { timestamp }))
                .await?;
        }
        Message::TaskUpdate { task, version } => {
            handler.on_task_change(TaskChange::Updated { task, version });
        }
        Message::TaskRemoved { app_id, task_id } => {
            handler.on_task_change(TaskChange::Removed { app_id, task_id });
        }
        Message::Error { code, message } => {
            tracing::warn!("Manager reported {:?}: {}", code, message);
        }
        other => {
            tracing::debug!("Ignoring {:?} on control stream", other.message_type());
        }
    }
    Ok(())
}

/// Move bytes between one forwarded stream and the tunnel
async fn pump(
    id: StreamId,
    io: DuplexStream,
    mut inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::Sender<Frame>,
) {
    let (mut reader, mut writer) = tokio::io::split(io);

    let upstream = async {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let data = Message::Data(Bytes::copy_from_slice(&buf[..n]));
                    if outbound.send(Frame::new(id, data)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!("Read error on {}: {}", id, e);
                    break;
                }
            }
        }
        let _ = outbound.send(Frame::new(id, Message::StreamClose)).await;
    };

    let downstream = async {
        while let Some(chunk) = inbound.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    };

    tokio::join!(upstream, downstream);
}
