//! Accessory codec
//!
//! Stateless helpers on top of [`Frame`]: build the bytes for a command,
//! classify whatever the device sent back, and convert the little-endian
//! floats used by the PID fields.

use crate::{Action, Command, Error, Frame, Result};
use bytes::Bytes;

/// Width of an encoded `f32`
pub const F32_SIZE: usize = 4;

/// One decoded read from the accessory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Single-byte acknowledgement of the last command
    Ack(bool),
    /// Full `[command][action][data...]` frame
    Frame(Frame),
}

/// Encode a command to wire bytes
#[inline]
pub fn encode(command: Command, action: Action, payload: &[u8]) -> Result<Bytes> {
    Ok(Frame::new(command, action, Bytes::copy_from_slice(payload))?.encode())
}

/// Decode bytes read from the accessory
pub fn decode(buf: &[u8]) -> Result<Inbound> {
    match buf {
        [] => Err(Error::BufferTooSmall { needed: 1, have: 0 }),
        [0] => Ok(Inbound::Ack(false)),
        [1] => Ok(Inbound::Ack(true)),
        [other] => Err(Error::InvalidAck(*other)),
        _ => Frame::decode(buf).map(Inbound::Frame),
    }
}

/// Encode an `f32` as IEEE-754 little-endian
#[inline]
pub fn f32_to_le(value: f32) -> [u8; F32_SIZE] {
    value.to_le_bytes()
}

/// Read a little-endian `f32` at `offset`
pub fn f32_from_le(buf: &[u8], offset: usize) -> Result<f32> {
    let end = offset + F32_SIZE;
    let bytes: [u8; F32_SIZE] = buf
        .get(offset..end)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Error::BufferTooSmall {
            needed: end,
            have: buf.len(),
        })?;
    Ok(f32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_bytes() {
        assert_eq!(decode(&[0x00]).unwrap(), Inbound::Ack(false));
        assert_eq!(decode(&[0x01]).unwrap(), Inbound::Ack(true));
        assert_eq!(decode(&[0x02]), Err(Error::InvalidAck(0x02)));
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_frame_bytes() {
        let encoded = encode(Command::Response, Action::Tune, &[1, 2, 3]).unwrap();
        match decode(&encoded).unwrap() {
            Inbound::Frame(frame) => {
                assert_eq!(frame.command, Command::Response);
                assert_eq!(frame.action, Action::Tune);
                assert_eq!(frame.payload.as_ref(), &[1, 2, 3]);
            }
            other => panic!("Expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_float_le() {
        assert_eq!(f32_to_le(1.0), [0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(f32_from_le(&[0x00, 0x00, 0x80, 0x3F], 0).unwrap(), 1.0);
        assert_eq!(f32_from_le(&[0xAA, 0x00, 0x00, 0x80, 0x3F], 1).unwrap(), 1.0);
        assert_eq!(
            f32_from_le(&[0x00, 0x00, 0x80], 0),
            Err(Error::BufferTooSmall { needed: 4, have: 3 })
        );
    }
}
