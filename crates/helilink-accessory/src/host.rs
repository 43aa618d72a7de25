//! Accessory host trait definitions
//!
//! The host is whatever the platform offers for finding and opening the
//! accessory: a USB accessory service, a serial port enumerator, or a mock
//! in tests. Asynchronous answers (permission grants, hot-plug) are posted
//! back through a [`HostEventSink`] into the link manager's input queue.

use std::fmt;
use std::io::{Read, Write};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::manager::LinkInput;

/// Identity of an enumerated accessory
#[derive(Debug, Clone, Default)]
pub struct AccessoryInfo {
    /// Platform id (port path for serial hosts)
    pub id: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl AccessoryInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

impl PartialEq for AccessoryInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AccessoryInfo {}

impl fmt::Display for AccessoryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.manufacturer, &self.product) {
            (Some(manufacturer), Some(product)) => {
                write!(f, "{} ({} {})", self.id, manufacturer, product)
            }
            (None, Some(product)) => write!(f, "{} ({})", self.id, product),
            _ => f.write_str(&self.id),
        }
    }
}

/// An opened accessory, split into its two directions
///
/// The reader should return `TimedOut`/`WouldBlock` periodically so the
/// read loop can notice a close request.
pub struct AccessoryStream {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Events a host reports asynchronously
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// An accessory was plugged in
    Attached(AccessoryInfo),
    /// An accessory was unplugged
    Detached(AccessoryInfo),
    /// Answer to a [`PermissionRequest`]
    Permission {
        request_id: u64,
        accessory: AccessoryInfo,
        granted: bool,
    },
}

/// Sink for host events, feeding the link manager's input queue
#[derive(Clone)]
pub struct HostEventSink {
    tx: mpsc::UnboundedSender<LinkInput>,
}

impl HostEventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LinkInput>) -> Self {
        Self { tx }
    }

    /// Post an event; returns false once the link manager is gone
    pub fn post(&self, event: HostEvent) -> bool {
        self.tx.send(LinkInput::Host(event)).is_ok()
    }

    pub fn attached(&self, accessory: AccessoryInfo) -> bool {
        self.post(HostEvent::Attached(accessory))
    }

    pub fn detached(&self, accessory: AccessoryInfo) -> bool {
        self.post(HostEvent::Detached(accessory))
    }
}

impl fmt::Debug for HostEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEventSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Pending permission request, answered exactly once
#[derive(Debug)]
pub struct PermissionRequest {
    id: u64,
    accessory: AccessoryInfo,
    sink: HostEventSink,
}

impl PermissionRequest {
    pub(crate) fn new(id: u64, accessory: AccessoryInfo, sink: HostEventSink) -> Self {
        Self { id, accessory, sink }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn accessory(&self) -> &AccessoryInfo {
        &self.accessory
    }

    pub fn respond(self, granted: bool) {
        self.sink.post(HostEvent::Permission {
            request_id: self.id,
            accessory: self.accessory,
            granted,
        });
    }

    pub fn grant(self) {
        self.respond(true)
    }

    pub fn deny(self) {
        self.respond(false)
    }
}

/// Platform access to accessories
pub trait AccessoryHost: Send + Sync + 'static {
    /// List the accessories this host recognises, in a stable order
    fn accessories(&self) -> Result<Vec<AccessoryInfo>>;

    /// Check if the accessory can be opened without asking
    fn has_permission(&self, accessory: &AccessoryInfo) -> bool;

    /// Ask for access; the answer is posted through the request
    fn request_permission(&self, request: PermissionRequest);

    /// Withdraw an outstanding permission request
    fn cancel_permission(&self, _accessory: &AccessoryInfo) {}

    /// Open a bidirectional byte stream to the accessory
    fn open(&self, accessory: &AccessoryInfo) -> Result<AccessoryStream>;

    /// Start reporting attach/detach events to `events`
    fn watch(&self, _events: HostEventSink) {}
}
