//! helilink Accessory Layer
//!
//! This crate owns the link to the attached accessory:
//! - [`AccessoryHost`]: platform seam for enumeration, permission and open
//! - [`LinkManager`]: connection state machine, read loop, ordered writes
//!   and automatic reconnection
//! - Serial host (optional, for USB serial boards)

pub mod error;
pub mod host;
pub mod manager;

mod reader;
mod writer;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::{LinkError, Result};
pub use host::{AccessoryHost, AccessoryInfo, AccessoryStream, HostEvent, HostEventSink, PermissionRequest};
pub use manager::{
    ConnectionState, LinkConfig, LinkManager, LinkNotification, DEFAULT_RECONNECT_INTERVAL,
    MIN_RECONNECT_INTERVAL,
};

#[cfg(feature = "serial")]
pub use serial::{SerialAccessoryHost, SerialHostConfig};
