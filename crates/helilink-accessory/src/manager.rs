//! Accessory link manager
//!
//! Owns the connection state machine for a single accessory:
//!
//! ```text
//!                 tick: permitted, open ok
//!   Disconnected ─────────────────────────────────► Connected
//!     │  ▲   ▲                                        │
//!     │  │   └──── write failure / detach / disconnect┘
//!     │  │ denied
//!     ▼  │
//!   AwaitingPermission ── granted, open ok ─────────► Connected
//! ```
//!
//! `Connecting` is held while a stream is being opened. Every transition
//! happens under one connection lock. Discovery ticks, permission answers,
//! hot-plug events and write failures arrive on a single input queue that a
//! driver task applies in order; inputs that belong to an older connection
//! epoch are discarded.
//!
//! Everything a listener needs to know is sent as a [`LinkNotification`] on
//! the queue returned by [`LinkManager::new`], to be consumed on the host's
//! own task.

use bytes::Bytes;
use helilink_core::{Action, Command, Frame};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::host::{AccessoryHost, AccessoryInfo, HostEvent, HostEventSink, PermissionRequest};
use crate::reader::ReadLoop;
use crate::writer::{self, WriteJob, WriteQueue};

/// Default interval between discovery attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Shortest accepted discovery interval
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(10);

/// Link manager configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Interval between discovery attempts while disconnected (default: 5s)
    pub reconnect_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Connection state of the accessory link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    AwaitingPermission,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::AwaitingPermission => "awaiting permission",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Notifications for the hosting application
#[derive(Debug, Clone, PartialEq)]
pub enum LinkNotification {
    /// Accessory opened
    Connected { accessory: AccessoryInfo },
    /// Accessory closed (explicitly or after a fault)
    Disconnected { reason: Option<String> },
    /// Single-byte acknowledgement from the accessory
    Ack(bool),
    /// Frame sent by the accessory
    Frame(Frame),
    /// Command written to the accessory
    CommandSent(Frame),
    /// Command dropped or failed to write
    CommandFailed {
        command: Command,
        action: Action,
        reason: String,
    },
}

/// Inputs applied by the driver task
#[derive(Debug)]
pub(crate) enum LinkInput {
    DiscoveryTick,
    Host(HostEvent),
    WriteFailed { epoch: u64, reason: String },
}

struct PendingPermission {
    id: u64,
    accessory: AccessoryInfo,
}

struct OpenLink {
    accessory: AccessoryInfo,
    epoch: u64,
    reader: ReadLoop,
    writer: WriteQueue,
}

impl OpenLink {
    fn close(self) {
        self.reader.stop();
        self.writer.close();
    }
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    /// Set by connect, cleared by disconnect
    wanted: bool,
    timer: Option<JoinHandle<()>>,
    pending: Option<PendingPermission>,
    link: Option<OpenLink>,
    epoch: u64,
    next_request_id: u64,
}

struct Shared {
    host: Arc<dyn AccessoryHost>,
    config: LinkConfig,
    runtime: Handle,
    inner: Mutex<Inner>,
    inputs: mpsc::UnboundedSender<LinkInput>,
    notifications: mpsc::UnboundedSender<LinkNotification>,
}

/// Accessory link manager
///
/// Cheap to clone; all clones drive the same link.
#[derive(Clone)]
pub struct LinkManager {
    shared: Arc<Shared>,
}

impl LinkManager {
    /// Create a link manager and its notification queue
    ///
    /// Must be called from within a Tokio runtime; the driver task and the
    /// reconnect timer run on it.
    pub fn new(
        host: Arc<dyn AccessoryHost>,
        mut config: LinkConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkNotification>) {
        if config.reconnect_interval < MIN_RECONNECT_INTERVAL {
            warn!(
                "Reconnect interval {:?} is too short, using {:?}",
                config.reconnect_interval, MIN_RECONNECT_INTERVAL
            );
            config.reconnect_interval = MIN_RECONNECT_INTERVAL;
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            host,
            config,
            runtime: Handle::current(),
            inner: Mutex::new(Inner::default()),
            inputs: input_tx,
            notifications: notify_tx,
        });

        shared
            .runtime
            .spawn(drive(Arc::downgrade(&shared), input_rx));
        shared.host.watch(HostEventSink::new(shared.inputs.clone()));

        (Self { shared }, notify_rx)
    }

    /// Start discovery; a no-op while connected or already trying
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.connect_locked(&mut inner);
    }

    /// Close the link and stop reconnecting; safe to repeat
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        inner.wanted = false;
        self.shared.cancel_timer(&mut inner);

        if let Some(pending) = inner.pending.take() {
            debug!("Withdrawing permission request for {}", pending.accessory);
            self.shared.host.cancel_permission(&pending.accessory);
        }

        if self.shared.close_link(&mut inner) {
            info!("Disconnected from accessory");
            self.shared.notify(LinkNotification::Disconnected { reason: None });
        }
        inner.state = ConnectionState::Disconnected;
    }

    /// Queue a command for the accessory without waiting for the write
    pub fn send_command(&self, command: Command, action: Action, payload: impl Into<Bytes>) {
        let job = WriteJob {
            command,
            action,
            payload: payload.into(),
        };

        let inner = self.shared.inner.lock();
        let rejected = match inner.link.as_ref() {
            Some(link) => link.writer.push(job).err(),
            None => Some(job),
        };

        if let Some(job) = rejected {
            warn!(
                "Send failed: no open accessory link for {} {} (state: {})",
                job.command, job.action, inner.state
            );
            writer::fail(&self.shared.notifications, &job, "not connected");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Check if the read loop of the open link is still running
    pub fn is_reader_alive(&self) -> bool {
        self.shared
            .inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.reader.is_alive())
            .unwrap_or(false)
    }

    pub fn current_accessory(&self) -> Option<AccessoryInfo> {
        self.shared
            .inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.accessory.clone())
    }

    /// Sink through which a host posts permission answers and hot-plug events
    pub fn host_events(&self) -> HostEventSink {
        HostEventSink::new(self.shared.inputs.clone())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }
}

impl fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkManager")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Apply inputs one at a time
///
/// Host calls (enumeration, permission checks, open) may block, so each
/// input is handled on the blocking pool and awaited before the next.
async fn drive(shared: Weak<Shared>, mut inputs: mpsc::UnboundedReceiver<LinkInput>) {
    while let Some(input) = inputs.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || shared.handle(input)).await {
            error!("Link input handler failed: {}", e);
        }
    }
    debug!("Link driver stopped");
}

impl Shared {
    fn notify(&self, notification: LinkNotification) {
        let _ = self.notifications.send(notification);
    }

    fn handle(&self, input: LinkInput) {
        let mut inner = self.inner.lock();

        match input {
            LinkInput::DiscoveryTick => {
                if !inner.wanted {
                    debug!("Discarding discovery tick after disconnect");
                    self.cancel_timer(&mut inner);
                    return;
                }

                match inner.state {
                    ConnectionState::Disconnected => self.discover(&mut inner),
                    ConnectionState::Connected => self.cancel_timer(&mut inner),
                    ConnectionState::AwaitingPermission | ConnectionState::Connecting => {}
                }
            }
            LinkInput::Host(HostEvent::Permission {
                request_id,
                accessory,
                granted,
            }) => {
                let matches = inner.state == ConnectionState::AwaitingPermission
                    && inner.pending.as_ref().map(|p| p.id) == Some(request_id);
                if !matches {
                    debug!("Discarding stale permission answer for {}", accessory);
                    return;
                }

                let Some(pending) = inner.pending.take() else {
                    return;
                };
                if granted {
                    self.open(&mut inner, pending.accessory);
                } else {
                    info!("Permission denied for {}", pending.accessory);
                    inner.state = ConnectionState::Disconnected;
                }
            }
            LinkInput::Host(HostEvent::Attached(accessory)) => {
                debug!("Accessory attached: {}", accessory);
                if inner.wanted && inner.state == ConnectionState::Disconnected {
                    self.connect_locked(&mut inner);
                    self.discover(&mut inner);
                }
            }
            LinkInput::Host(HostEvent::Detached(accessory)) => {
                let is_pending = inner.state == ConnectionState::AwaitingPermission
                    && inner
                        .pending
                        .as_ref()
                        .map(|p| p.accessory == accessory)
                        .unwrap_or(false);
                if is_pending {
                    info!("Accessory detached while awaiting permission: {}", accessory);
                    if let Some(pending) = inner.pending.take() {
                        self.host.cancel_permission(&pending.accessory);
                    }
                    inner.state = ConnectionState::Disconnected;
                    if inner.wanted && inner.timer.is_none() {
                        self.arm_timer(&mut inner);
                    }
                    return;
                }

                let is_current = inner
                    .link
                    .as_ref()
                    .map(|link| link.accessory == accessory)
                    .unwrap_or(false);
                if !is_current {
                    debug!("Ignoring detach of {}", accessory);
                    return;
                }

                info!("Accessory detached: {}", accessory);
                self.close_link(&mut inner);
                inner.state = ConnectionState::Disconnected;
                self.notify(LinkNotification::Disconnected {
                    reason: Some("accessory detached".to_string()),
                });
                if inner.wanted {
                    self.arm_timer(&mut inner);
                }
            }
            LinkInput::WriteFailed { epoch, reason } => {
                let current = inner.link.as_ref().map(|link| link.epoch) == Some(epoch);
                if !current {
                    debug!("Discarding write failure from epoch {}", epoch);
                    return;
                }

                warn!("Accessory write failed, reconnecting: {}", reason);
                self.close_link(&mut inner);
                inner.state = ConnectionState::Disconnected;
                self.notify(LinkNotification::Disconnected {
                    reason: Some(reason),
                });
                self.arm_timer(&mut inner);
            }
        }
    }

    fn connect_locked(&self, inner: &mut Inner) {
        inner.wanted = true;

        if inner.state != ConnectionState::Disconnected {
            debug!("Connect ignored, link is {}", inner.state);
            return;
        }
        if inner.timer.is_some() {
            return;
        }

        info!("Connecting to accessory...");
        self.arm_timer(inner);
    }

    fn arm_timer(&self, inner: &mut Inner) {
        self.cancel_timer(inner);

        let inputs = self.inputs.clone();
        let period = self.config.reconnect_interval;
        inner.timer = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if inputs.send(LinkInput::DiscoveryTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_timer(&self, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    fn discover(&self, inner: &mut Inner) {
        let accessories = match self.host.accessories() {
            Ok(accessories) => accessories,
            Err(e) => {
                warn!("Accessory enumeration failed: {}", e);
                return;
            }
        };

        if accessories.len() > 1 {
            debug!(
                "{} accessories present, selecting the first",
                accessories.len()
            );
        }

        let Some(accessory) = accessories.into_iter().next() else {
            debug!("No accessory attached");
            return;
        };

        if self.host.has_permission(&accessory) {
            self.open(inner, accessory);
        } else {
            inner.next_request_id += 1;
            let id = inner.next_request_id;
            debug!("Requesting permission for {} (request {})", accessory, id);

            inner.pending = Some(PendingPermission {
                id,
                accessory: accessory.clone(),
            });
            inner.state = ConnectionState::AwaitingPermission;
            self.host.request_permission(PermissionRequest::new(
                id,
                accessory,
                HostEventSink::new(self.inputs.clone()),
            ));
        }
    }

    fn open(&self, inner: &mut Inner, accessory: AccessoryInfo) {
        inner.state = ConnectionState::Connecting;
        debug!("Opening accessory {}", accessory);

        let stream = match self.host.open(&accessory) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open {}: {}", accessory, e);
                inner.state = ConnectionState::Disconnected;
                return;
            }
        };

        inner.epoch += 1;
        let epoch = inner.epoch;

        // Announce before the read loop can deliver anything
        info!("Accessory connected: {}", accessory);
        self.notify(LinkNotification::Connected {
            accessory: accessory.clone(),
        });

        let reader = match ReadLoop::spawn(stream.reader, epoch, self.notifications.clone()) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to start read loop: {}", e);
                self.abort_open(inner, e);
                return;
            }
        };

        let writer = match WriteQueue::spawn(
            stream.writer,
            epoch,
            reader.alive_flag(),
            self.inputs.clone(),
            self.notifications.clone(),
        ) {
            Ok(writer) => writer,
            Err(e) => {
                error!("Failed to start write queue: {}", e);
                reader.stop();
                self.abort_open(inner, e);
                return;
            }
        };

        inner.link = Some(OpenLink {
            accessory,
            epoch,
            reader,
            writer,
        });
        inner.state = ConnectionState::Connected;
        self.cancel_timer(inner);
    }

    fn abort_open(&self, inner: &mut Inner, e: std::io::Error) {
        inner.state = ConnectionState::Disconnected;
        self.notify(LinkNotification::Disconnected {
            reason: Some(e.to_string()),
        });
    }

    /// Close the open link, if any; returns whether one was open
    fn close_link(&self, inner: &mut Inner) -> bool {
        match inner.link.take() {
            Some(link) => {
                debug!("Closing accessory {} (epoch {})", link.accessory, link.epoch);
                link.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if let Some(link) = inner.link.take() {
            link.close();
        }
    }
}
