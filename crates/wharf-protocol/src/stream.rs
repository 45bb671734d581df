//! Tunnel stream identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one forwarded connection multiplexed over the tunnel.
///
/// Stream ids are allocated by the manager when it opens a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl StreamId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Reserved for control traffic (registration, heartbeats, task pushes)
    pub const CONTROL: StreamId = StreamId(0);

    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_display() {
        assert_eq!(format!("{}", StreamId::new(42)), "stream-42");
    }

    #[test]
    fn test_control_stream() {
        assert!(StreamId::CONTROL.is_control());
        assert!(!StreamId::new(7).is_control());
    }
}
