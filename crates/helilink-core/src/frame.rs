//! Binary frame encoding/decoding
//!
//! Accessory frame format:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Byte 0:     Command id                       │
//! │ Byte 1:     Action id                        │
//! ├──────────────────────────────────────────────┤
//! │ Bytes 2..N: Payload (0..=253 bytes)          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! There is no length or checksum field; a frame is exactly one write.

use crate::{Action, Command, Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame header size (command + action)
pub const HEADER_SIZE: usize = 2;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = 253;

/// Maximum size of an encoded frame
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// An accessory command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub action: Action,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame, rejecting oversized payloads
    pub fn new(command: Command, action: Action, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }

        Ok(Self {
            command,
            action,
            payload,
        })
    }

    /// Create a frame with no payload
    pub fn empty(command: Command, action: Action) -> Self {
        Self {
            command,
            action,
            payload: Bytes::new(),
        }
    }

    /// Calculate the total frame size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(self.command.as_u8());
        buf.put_u8(self.action.as_u8());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decode frame from bytes
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        let command = Command::try_from(buf.get_u8())?;
        let action = Action::try_from(buf.get_u8())?;

        if buf.remaining() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(buf.remaining()));
        }

        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            command,
            action,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let frame = Frame::new(Command::Control, Action::Sticks, vec![10u8, 251, 0, 3]).unwrap();

        let encoded = frame.encode();
        assert_eq!(encoded.as_ref(), &[0x01, 0x03, 0x0A, 0xFB, 0x00, 0x03]);

        let decoded = Frame::decode(&encoded[..]).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::empty(Command::Get, Action::Tune);
        assert_eq!(frame.size(), 2);
        assert_eq!(frame.encode().as_ref(), &[0x03, 0x05]);
    }

    #[test]
    fn test_payload_limit() {
        assert!(Frame::new(Command::Settings, Action::Tune, vec![0u8; MAX_PAYLOAD_SIZE]).is_ok());
        assert_eq!(
            Frame::new(Command::Settings, Action::Tune, vec![0u8; MAX_PAYLOAD_SIZE + 1]),
            Err(Error::PayloadTooLarge(254))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_ids() {
        assert_eq!(
            Frame::decode(&[0x09u8, 0x01][..]),
            Err(Error::UnknownCommand(0x09))
        );
        assert_eq!(
            Frame::decode(&[0x01u8, 0x00][..]),
            Err(Error::UnknownAction(0x00))
        );
        assert_eq!(
            Frame::decode(&[0x01u8][..]),
            Err(Error::BufferTooSmall { needed: 2, have: 1 })
        );
    }
}
