//! wharf-protocol: Wire protocol between a wharf agent and its manager
//!
//! This crate defines the framed binary protocol carried over the agent's
//! tunnel, and the scheduler records that the manager hands to agents
//! either over that tunnel or over its HTTP query surface.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod scheduler;
pub mod stream;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    ErrorCode, Message, MessageType, Scope, PROTOCOL_VERSION, TUNNEL_PATH, TUNNEL_UPGRADE,
};
pub use scheduler::{
    AppId, AppSummary, ProxyConfig, TaskHealth, TaskId, TaskRecord, TaskRef, TaskStatus,
    VersionId, VersionRecord,
};
pub use stream::StreamId;
