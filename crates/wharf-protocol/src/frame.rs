//! Tunnel frame header
//!
//! ```text
//! 0        4      5          8
//! +--------+------+----------+-------------------+
//! | stream | type | length   | bincode payload   |
//! | u32 BE | u8   | u24 BE   | `length` bytes    |
//! +--------+------+----------+-------------------+
//! ```
//!
//! Stream 0 carries control traffic (registration, heartbeats, task
//! changes); every other id is one forwarded connection. A header whose
//! message type does not belong on its stream is rejected before any byte
//! of it is consumed.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::stream::StreamId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest payload the 24-bit length field can announce
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream_id: StreamId,
    pub message_type: MessageType,
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(stream_id: StreamId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            stream_id,
            message_type,
            payload_length,
        }
    }

    /// Check the header against the stream rules.
    ///
    /// Every encoded message carries at least its variant tag, so a zero
    /// length is never valid.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.message_type.allowed_on(self.stream_id) {
            return Err(ProtocolError::WrongStream {
                message_type: self.message_type,
                stream_id: self.stream_id.as_u32(),
            });
        }
        if self.payload_length == 0 {
            return Err(ProtocolError::EmptyPayload(self.message_type));
        }
        if self.payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload_length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(())
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.stream_id.as_u32());
        dst.put_u8(self.message_type.as_u8());
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode and validate a header.
    ///
    /// `Ok(None)` until `HEADER_SIZE` bytes are buffered. On error `src` is
    /// left as it was.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let type_byte = src[4];
        let message_type = MessageType::from_u8(type_byte)
            .ok_or(ProtocolError::UnknownMessageType(type_byte))?;
        let stream_id = StreamId::new(u32::from_be_bytes([src[0], src[1], src[2], src[3]]));
        let payload_length = u32::from_be_bytes([0, src[5], src[6], src[7]]);

        let header = Self::new(stream_id, message_type, payload_length);
        header.validate()?;

        src.advance(HEADER_SIZE);
        Ok(Some(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FrameHeader::new(StreamId::new(0x0102_0304), MessageType::Data, 0x0A0B0C);

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(
            &buf[..],
            &[0x01, 0x02, 0x03, 0x04, MessageType::Data.as_u8(), 0x0A, 0x0B, 0x0C]
        );

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; 4][..]);
        assert!(FrameHeader::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_unknown_message_type() {
        let mut buf = BytesMut::from(&[0, 0, 0, 1, 0xEE, 0, 0, 10][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownMessageType(0xEE))
        ));
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_task_update_on_forwarded_stream_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(StreamId::new(3), MessageType::TaskUpdate, 40).encode(&mut buf);

        match FrameHeader::decode(&mut buf) {
            Err(ProtocolError::WrongStream {
                message_type,
                stream_id,
            }) => {
                assert_eq!(message_type, MessageType::TaskUpdate);
                assert_eq!(stream_id, 3);
            }
            other => panic!("Expected WrongStream, got {:?}", other),
        }
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_data_on_control_stream_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(StreamId::CONTROL, MessageType::Data, 12).encode(&mut buf);

        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::WrongStream {
                message_type: MessageType::Data,
                stream_id: 0
            })
        ));
    }

    #[test]
    fn test_error_allowed_on_any_stream() {
        for stream in [StreamId::CONTROL, StreamId::new(8)] {
            let mut buf = BytesMut::new();
            FrameHeader::new(stream, MessageType::Error, 16).encode(&mut buf);
            assert!(FrameHeader::decode(&mut buf).unwrap().is_some());
        }
    }

    #[test]
    fn test_empty_data_payload_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader::new(StreamId::new(2), MessageType::Data, 0).encode(&mut buf);

        assert!(matches!(
            FrameHeader::decode(&mut buf),
            Err(ProtocolError::EmptyPayload(MessageType::Data))
        ));
    }

    #[test]
    fn test_max_payload_length() {
        let header = FrameHeader::new(
            StreamId::CONTROL,
            MessageType::TaskUpdate,
            MAX_PAYLOAD_SIZE as u32,
        );

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length, MAX_PAYLOAD_SIZE as u32);
    }
}
