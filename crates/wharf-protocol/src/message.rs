//! Message types for the wharf tunnel protocol
//!
//! Messages are serialized with bincode and wrapped in frames by the codec
//! in `codec.rs`.
//!
//! # Message Flow
//!
//! 1. Agent opens a TCP connection and upgrades it with
//!    `Upgrade: wharf-tunnel/1` (see [`TUNNEL_UPGRADE`])
//! 2. Agent sends `Register`, manager answers `RegisterAck`
//! 3. Manager sends `Heartbeat` periodically, agent answers `HeartbeatAck`
//! 4. Manager pushes `TaskUpdate` / `TaskRemoved` on the control stream as
//!    scheduler state changes
//! 5. To reach the agent's local API the manager sends `StreamOpen` on a
//!    fresh stream id; `Data` then flows both ways until either side sends
//!    `StreamClose`

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::scheduler::{AppId, TaskId, TaskRecord, VersionRecord};
use crate::stream::StreamId;

/// Current protocol version string, sent in `Register`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Token used in the `Upgrade` header when opening a tunnel.
pub const TUNNEL_UPGRADE: &str = "wharf-tunnel/1";

/// Manager path the tunnel upgrade request targets.
pub const TUNNEL_PATH: &str = "/v1/agent/tunnel";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Registration message (agent → manager)
    Register = 0x01,
    /// Registration acknowledgment
    RegisterAck = 0x02,
    /// Heartbeat ping
    Heartbeat = 0x03,
    /// Heartbeat acknowledgment
    HeartbeatAck = 0x04,
    /// Manager opens a forwarded connection
    StreamOpen = 0x10,
    /// Bytes on a forwarded connection
    Data = 0x11,
    /// Either side closes a forwarded connection
    StreamClose = 0x12,
    /// A task was created or changed state
    TaskUpdate = 0x20,
    /// A task no longer exists in the scheduler
    TaskRemoved = 0x21,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Register),
            0x02 => Some(Self::RegisterAck),
            0x03 => Some(Self::Heartbeat),
            0x04 => Some(Self::HeartbeatAck),
            0x10 => Some(Self::StreamOpen),
            0x11 => Some(Self::Data),
            0x12 => Some(Self::StreamClose),
            0x20 => Some(Self::TaskUpdate),
            0x21 => Some(Self::TaskRemoved),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Streams a message type may travel on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Stream 0 only
    Control,
    /// A forwarded stream, never stream 0
    Forwarded,
    /// Either
    Any,
}

impl MessageType {
    pub fn scope(&self) -> Scope {
        match self {
            Self::Register
            | Self::RegisterAck
            | Self::Heartbeat
            | Self::HeartbeatAck
            | Self::TaskUpdate
            | Self::TaskRemoved => Scope::Control,
            Self::StreamOpen | Self::Data | Self::StreamClose => Scope::Forwarded,
            Self::Error => Scope::Any,
        }
    }

    /// Whether a frame of this type may carry `stream_id`
    pub fn allowed_on(&self, stream_id: StreamId) -> bool {
        match self.scope() {
            Scope::Control => stream_id.is_control(),
            Scope::Forwarded => !stream_id.is_control(),
            Scope::Any => true,
        }
    }
}

/// Error codes for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    /// Frame addressed a stream that is not open
    StreamNotFound = 1,
    /// Registration refused
    RegistrationRefused = 2,
    /// Message not valid in this direction or state
    InvalidMessage = 3,
    /// Receiver fell too far behind; the stream was dropped
    StreamOverflow = 4,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Agent registration, sent right after the tunnel upgrade.
    Register {
        /// Stable identifier of this agent (configured alias or hostname)
        agent_id: String,
        /// Hostname of the agent machine
        hostname: String,
        /// Operating system (e.g., "linux")
        os: String,
        /// CPU architecture (e.g., "x86_64")
        arch: String,
        /// Protocol version, `PROTOCOL_VERSION` when sent by this crate
        version: String,
    },

    /// Registration acknowledgment
    RegisterAck {
        accepted: bool,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// Heartbeat ping
    Heartbeat { timestamp: u64 },

    /// Heartbeat acknowledgment, echoing the ping's timestamp
    HeartbeatAck { timestamp: u64 },

    /// Open a forwarded connection on the frame's stream id
    StreamOpen,

    /// Bytes on a forwarded connection
    Data(Bytes),

    /// Close a forwarded connection
    StreamClose,

    /// Task created or changed state.
    ///
    /// `version` is the task's application version record; `None` when the
    /// manager could not resolve it, which disables gateway exposure.
    TaskUpdate {
        task: TaskRecord,
        version: Option<VersionRecord>,
    },

    /// Task removed from the scheduler
    TaskRemoved { app_id: AppId, task_id: TaskId },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Register { .. } => MessageType::Register,
            Message::RegisterAck { .. } => MessageType::RegisterAck,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::HeartbeatAck { .. } => MessageType::HeartbeatAck,
            Message::StreamOpen => MessageType::StreamOpen,
            Message::Data(_) => MessageType::Data,
            Message::StreamClose => MessageType::StreamClose,
            Message::TaskUpdate { .. } => MessageType::TaskUpdate,
            Message::TaskRemoved { .. } => MessageType::TaskRemoved,
            Message::Error { .. } => MessageType::Error,
        }
    }
}
