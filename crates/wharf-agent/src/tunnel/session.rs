//! Cluster session establishment
//!
//! A session is one TCP connection to a manager, upgraded to the framed
//! tunnel protocol and registered. It is consumed by [`ClusterSession::split`]
//! into the protocol loop and the listener for forwarded streams.

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use wharf_core::config::AgentConfig;
use wharf_core::ManagerAddr;
use wharf_protocol::{
    Frame, FrameCodec, Message, MessageType, ProtocolError, PROTOCOL_VERSION, TUNNEL_PATH,
    TUNNEL_UPGRADE,
};

use super::listener::TunnelListener;
use super::protocol::ProtocolLoop;

/// Header naming the agent on the upgrade request
const AGENT_HEADER: &str = "x-wharf-agent";

/// Forwarded streams waiting for the API loop to pick them up
const ACCEPT_BACKLOG: usize = 64;

/// Byte stream the tunnel runs over
pub(crate) trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub(crate) type TunnelFramed = Framed<Box<dyn Transport>, FrameCodec>;

/// Errors establishing or running a cluster session
#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP connection to the manager failed
    #[error("Failed to connect to manager {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A join step did not finish within the connect timeout
    #[error("Timed out {stage} with manager {addr}")]
    Timeout { addr: String, stage: &'static str },

    /// The manager did not switch protocols
    #[error("Tunnel upgrade refused: {0}")]
    Upgrade(String),

    /// The manager refused the registration
    #[error("Registration rejected: {0}")]
    Rejected(String),

    /// A message that has no meaning at this point of the handshake
    #[error("Unexpected {0:?} before registration completed")]
    Unexpected(MessageType),

    /// Framing or serialization failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The manager closed the tunnel
    #[error("Tunnel closed by manager")]
    Closed,

    /// Nothing arrived from the manager for too long
    #[error("No frame from manager for {0:?}")]
    HeartbeatTimeout(Duration),

    /// The API side dropped its listener
    #[error("Tunnel listener dropped")]
    ListenerGone,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Parameters for joining a manager
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Identifier sent at registration
    pub agent_id: String,
    /// Bound on connecting, upgrading and registering, each
    pub connect_timeout: Duration,
    /// Idle limit for the established tunnel
    pub heartbeat_timeout: Duration,
}

impl JoinOptions {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            agent_id: config.agent_id(),
            connect_timeout: config.connect_timeout,
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// A registered tunnel to one manager
pub struct ClusterSession {
    manager: ManagerAddr,
    framed: TunnelFramed,
    heartbeat_timeout: Duration,
}

impl std::fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSession")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl ClusterSession {
    /// Connect to `manager`, upgrade to the tunnel protocol and register
    pub async fn join(manager: ManagerAddr, options: &JoinOptions) -> Result<Self, SessionError> {
        let addr = manager.authority().to_string();

        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SessionError::Timeout {
                addr: addr.clone(),
                stage: "connecting",
            })?
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let upgraded = tokio::time::timeout(
            options.connect_timeout,
            upgrade(stream, &manager, &options.agent_id),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            addr: addr.clone(),
            stage: "upgrading",
        })??;

        tracing::debug!("Tunnel upgraded with {}", manager);

        // Bytes hyper read past the 101 stay inside `Upgraded`
        let transport: Box<dyn Transport> = Box::new(TokioIo::new(upgraded));
        let framed = Framed::new(transport, FrameCodec::new());

        Self::register(manager, framed, options).await
    }

    /// Register over an already upgraded transport
    pub(crate) async fn register(
        manager: ManagerAddr,
        mut framed: TunnelFramed,
        options: &JoinOptions,
    ) -> Result<Self, SessionError> {
        let register = Message::Register {
            agent_id: options.agent_id.clone(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        };
        framed.send(Frame::control(register)).await?;

        tokio::time::timeout(options.connect_timeout, await_ack(&mut framed))
            .await
            .map_err(|_| SessionError::Timeout {
                addr: manager.authority().to_string(),
                stage: "registering",
            })??;

        tracing::info!("Registered with manager {} as {}", manager, options.agent_id);

        Ok(Self {
            manager,
            framed,
            heartbeat_timeout: options.heartbeat_timeout,
        })
    }

    /// Manager this session is joined to
    pub fn manager(&self) -> &ManagerAddr {
        &self.manager
    }

    /// Consume the session into its protocol loop and stream listener.
    ///
    /// The listener closes as soon as the protocol loop exits.
    pub fn split(self) -> (ProtocolLoop, TunnelListener) {
        let (accept_tx, listener) = TunnelListener::channel(ACCEPT_BACKLOG);
        let protocol = ProtocolLoop::new(
            self.manager,
            self.framed,
            accept_tx,
            self.heartbeat_timeout,
        );
        (protocol, listener)
    }
}

/// Send the upgrade request and wait for `101 Switching Protocols`
async fn upgrade(
    stream: TcpStream,
    manager: &ManagerAddr,
    agent_id: &str,
) -> Result<Upgraded, SessionError> {
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| SessionError::Upgrade(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!("Tunnel upgrade connection failed: {}", e);
        }
    });

    let request = Request::get(TUNNEL_PATH)
        .header(header::HOST, manager.authority())
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, TUNNEL_UPGRADE)
        .header(AGENT_HEADER, agent_id)
        .body(Body::empty())
        .map_err(|e| SessionError::Upgrade(e.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| SessionError::Upgrade(e.to_string()))?;
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(SessionError::Upgrade(format!(
            "manager answered {}",
            response.status()
        )));
    }

    hyper::upgrade::on(response)
        .await
        .map_err(|e| SessionError::Upgrade(e.to_string()))
}

async fn await_ack(framed: &mut TunnelFramed) -> Result<(), SessionError> {
    loop {
        let frame = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(SessionError::Closed),
        };

        match frame.message {
            Message::RegisterAck { accepted: true, .. } => return Ok(()),
            Message::RegisterAck {
                accepted: false,
                reason,
            } => {
                return Err(SessionError::Rejected(
                    reason.unwrap_or_else(|| "no reason given".to_string()),
                ))
            }
            Message::Heartbeat { timestamp } => {
                framed
                    .send(Frame::control(Message::HeartbeatAck { timestamp }))
                    .await?;
            }
            Message::Error { code, message } => {
                return Err(SessionError::Rejected(format!("{:?}: {}", code, message)))
            }
            other => return Err(SessionError::Unexpected(other.message_type())),
        }
    }
}
