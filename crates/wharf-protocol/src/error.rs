//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Header and payload disagree on the message kind
    #[error("Message type mismatch: header says {header:?}, payload is {payload:?}")]
    TypeMismatch {
        header: crate::message::MessageType,
        payload: crate::message::MessageType,
    },

    /// Message type is not allowed on the frame's stream
    #[error("{message_type:?} is not allowed on stream {stream_id}")]
    WrongStream {
        message_type: crate::message::MessageType,
        stream_id: u32,
    },

    /// Header announced an empty payload
    #[error("Empty payload for {0:?}")]
    EmptyPayload(crate::message::MessageType),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
