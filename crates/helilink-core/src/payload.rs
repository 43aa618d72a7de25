//! Typed payloads carried inside accessory frames

use crate::codec::{f32_from_le, f32_to_le, F32_SIZE};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Stick positions for `Control/Sticks`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StickPositions {
    pub throttle: i8,
    pub pitch: i8,
    pub roll: i8,
    pub yaw: i8,
}

impl StickPositions {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[
            self.throttle as u8,
            self.pitch as u8,
            self.roll as u8,
            self.yaw as u8,
        ])
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        match payload {
            [throttle, pitch, roll, yaw, ..] => Ok(Self {
                throttle: *throttle as i8,
                pitch: *pitch as i8,
                roll: *roll as i8,
                yaw: *yaw as i8,
            }),
            _ => Err(Error::BufferTooSmall {
                needed: Self::SIZE,
                have: payload.len(),
            }),
        }
    }
}

/// Motor standby switch for `Control/Standby`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Standby {
    pub on: bool,
}

impl Standby {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[u8::from(self.on)])
    }
}

/// Axis selector sent as the first byte of a tune payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneAxis {
    Pitch,
    Roll,
    Yaw,
    /// Any other selector, forwarded untouched
    Other(u8),
}

impl TuneAxis {
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TuneAxis::Pitch,
            2 => TuneAxis::Roll,
            3 => TuneAxis::Yaw,
            other => TuneAxis::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TuneAxis::Pitch => 1,
            TuneAxis::Roll => 2,
            TuneAxis::Yaw => 3,
            TuneAxis::Other(other) => other,
        }
    }
}

/// Proportional, integral and derivative gains of one axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub const SIZE: usize = 3 * F32_SIZE;

    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&f32_to_le(self.kp));
        buf.put_slice(&f32_to_le(self.ki));
        buf.put_slice(&f32_to_le(self.kd));
    }

    fn read(buf: &[u8], offset: usize) -> Result<Self> {
        Ok(Self {
            kp: f32_from_le(buf, offset)?,
            ki: f32_from_le(buf, offset + F32_SIZE)?,
            kd: f32_from_le(buf, offset + 2 * F32_SIZE)?,
        })
    }
}

/// New gains for one axis, sent with `Settings/Tune`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneSettings {
    pub axis: TuneAxis,
    pub gains: PidGains,
}

impl TuneSettings {
    pub const SIZE: usize = 1 + PidGains::SIZE;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u8(self.axis.as_u8());
        self.gains.put(&mut buf);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let axis = payload.first().copied().ok_or(Error::BufferTooSmall {
            needed: Self::SIZE,
            have: 0,
        })?;
        Ok(Self {
            axis: TuneAxis::from_u8(axis),
            gains: PidGains::read(payload, 1)?,
        })
    }
}

/// Gains of all three axes, returned by the device for `Get/Tune`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidReport {
    pub pitch: PidGains,
    pub roll: PidGains,
    pub yaw: PidGains,
}

impl PidReport {
    pub const SIZE: usize = 3 * PidGains::SIZE;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.pitch.put(&mut buf);
        self.roll.put(&mut buf);
        self.yaw.put(&mut buf);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                needed: Self::SIZE,
                have: payload.len(),
            });
        }

        Ok(Self {
            pitch: PidGains::read(payload, 0)?,
            roll: PidGains::read(payload, PidGains::SIZE)?,
            yaw: PidGains::read(payload, 2 * PidGains::SIZE)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticks_are_signed_bytes() {
        let sticks = StickPositions {
            throttle: 10,
            pitch: -5,
            roll: 0,
            yaw: 3,
        };
        assert_eq!(sticks.encode().as_ref(), &[0x0A, 0xFB, 0x00, 0x03]);
        assert_eq!(StickPositions::decode(&sticks.encode()).unwrap(), sticks);
    }

    #[test]
    fn test_standby() {
        assert_eq!(Standby { on: true }.encode().as_ref(), &[1]);
        assert_eq!(Standby { on: false }.encode().as_ref(), &[0]);
    }

    #[test]
    fn test_tune_layout() {
        let tune = TuneSettings {
            axis: TuneAxis::Roll,
            gains: PidGains::new(1.0, 0.0, -2.0),
        };
        let encoded = tune.encode();

        assert_eq!(encoded.len(), TuneSettings::SIZE);
        assert_eq!(encoded[0], 2);
        assert_eq!(&encoded[1..5], &[0x00, 0x00, 0x80, 0x3F]);
        assert_eq!(&encoded[9..13], &[0x00, 0x00, 0x00, 0xC0]);
        assert_eq!(TuneSettings::decode(&encoded).unwrap(), tune);
    }

    #[test]
    fn test_unknown_axis_passes_through() {
        assert_eq!(TuneAxis::from_u8(0), TuneAxis::Other(0));
        assert_eq!(TuneAxis::Other(7).as_u8(), 7);
    }

    #[test]
    fn test_report_requires_nine_floats() {
        let report = PidReport {
            pitch: PidGains::new(1.5, 0.25, 0.125),
            roll: PidGains::new(2.0, 0.5, 0.0),
            yaw: PidGains::new(3.0, 0.0, 1.0),
        };
        let encoded = report.encode();
        assert_eq!(encoded.len(), 36);
        assert_eq!(PidReport::decode(&encoded).unwrap(), report);
        assert_eq!(
            PidReport::decode(&encoded[..35]),
            Err(Error::BufferTooSmall {
                needed: 36,
                have: 35
            })
        );
    }
}
