//! helilink Core
//!
//! Wire-level types for the helilink accessory protocol.
//!
//! This crate provides:
//! - Command and action enumerations ([`Command`], [`Action`])
//! - Binary frame encoding/decoding ([`Frame`], [`codec`])
//! - Typed payloads carried inside frames ([`payload`])
//!
//! A frame on the wire is `[command][action][payload...]`, with no length
//! or checksum field. A lone `0x00`/`0x01` byte read back from the device
//! is a boolean acknowledgement.

pub mod codec;
pub mod error;
pub mod frame;
pub mod payload;
pub mod types;

pub use codec::{decode, encode, Inbound};
pub use error::{Error, Result};
pub use frame::Frame;
pub use payload::{PidGains, PidReport, Standby, StickPositions, TuneAxis, TuneSettings};
pub use types::{Action, Command};

/// Size of the read buffer used by the accessory read loop
pub const READ_BUFFER_SIZE: usize = 16 * 1024;
