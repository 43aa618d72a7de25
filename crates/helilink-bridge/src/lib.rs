//! helilink Control Channel Bridge
//!
//! Connects the operator's control channel to the accessory link:
//! - Event vocabulary and mapping table ([`events`], [`mapping`])
//! - Event router: channel events to commands, frames to replies
//! - Keepalive scheduler with a pluggable liveness probe
//! - Socket.IO control channel (feature `socketio`)
//! - Bridge service loop tying it all together

pub mod channel;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod mapping;
pub mod router;
pub mod service;

#[cfg(feature = "socketio")]
pub mod socketio;

pub use channel::{ChannelEvent, ControlChannel};
pub use error::{BridgeError, Result};
pub use events::{EventAction, EventCategory};
pub use keepalive::{
    KeepaliveEvent, KeepaliveScheduler, LivenessProbe, DEFAULT_KEEPALIVE_INTERVAL,
    MIN_KEEPALIVE_INTERVAL,
};
pub use mapping::{EventMapping, HostRequest, MappingTable, PayloadBuilder, Route};
pub use router::{CommandSink, Dispatch, EventRouter, Reply};
pub use service::{BridgeService, ServiceConfig, DEFAULT_CHANNEL_RETRY};

#[cfg(feature = "http")]
pub use keepalive::HttpProbe;

#[cfg(feature = "socketio")]
pub use socketio::{SocketIoChannel, SocketIoConfig};
