//! Bridge service
//!
//! Wires the accessory link, the event router, the control channel and
//! the keepalive scheduler together. [`BridgeService::run`] is the single
//! delivery context: link notifications, channel events and keepalive
//! events are all handled on its loop.

use helilink_accessory::{LinkManager, LinkNotification};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ControlChannel};
use crate::keepalive::{KeepaliveEvent, KeepaliveScheduler, LivenessProbe, DEFAULT_KEEPALIVE_INTERVAL};
use crate::mapping::HostRequest;
use crate::router::{Dispatch, EventRouter};
use crate::Result;

/// Default delay before reconnecting a lost control channel
pub const DEFAULT_CHANNEL_RETRY: Duration = Duration::from_secs(5);

/// Service timing
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub keepalive_interval: Duration,
    pub channel_retry: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            channel_retry: DEFAULT_CHANNEL_RETRY,
        }
    }
}

pub struct BridgeService<C: ControlChannel> {
    link: LinkManager,
    link_events: mpsc::UnboundedReceiver<LinkNotification>,
    router: EventRouter,
    channel: C,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
    keepalive: KeepaliveScheduler,
    keepalive_events: mpsc::UnboundedReceiver<KeepaliveEvent>,
    host_requests: Option<mpsc::UnboundedSender<HostRequest>>,
    link_listener: Option<mpsc::UnboundedSender<LinkNotification>>,
    channel_retry: Duration,
    retry_at: Option<Instant>,
}

impl<C: ControlChannel> BridgeService<C> {
    pub fn new(
        link: LinkManager,
        link_events: mpsc::UnboundedReceiver<LinkNotification>,
        channel: C,
        probe: Arc<dyn LivenessProbe>,
        config: ServiceConfig,
    ) -> Self {
        let router = EventRouter::new(Arc::new(link.clone()));
        let (keepalive, keepalive_events) =
            KeepaliveScheduler::new(probe, config.keepalive_interval);

        Self {
            link,
            link_events,
            router,
            channel,
            channel_events: None,
            keepalive,
            keepalive_events,
            host_requests: None,
            link_listener: None,
            channel_retry: config.channel_retry,
            retry_at: None,
        }
    }

    /// Receive the host functions requested over the channel
    ///
    /// Without a subscriber they are only logged.
    pub fn host_requests(&mut self) -> mpsc::UnboundedReceiver<HostRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.host_requests = Some(tx);
        rx
    }

    /// Receive every accessory notification (connection changes, acks,
    /// frames, send results) after the service has handled it
    pub fn link_notifications(&mut self) -> mpsc::UnboundedReceiver<LinkNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.link_listener = Some(tx);
        rx
    }

    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Run until `shutdown` resolves, then tear everything down
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.link.connect();
        self.start_channel().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                Some(notification) = self.link_events.recv() => {
                    self.on_link(notification).await;
                }
                event = next_channel_event(&mut self.channel_events) => match event {
                    Some(event) => self.on_channel(event).await,
                    None => self.channel_lost("event stream ended").await,
                },
                Some(event) = self.keepalive_events.recv() => {
                    self.on_keepalive(event).await;
                }
                _ = wait_until(self.retry_at) => {
                    self.retry_at = None;
                    self.start_channel().await;
                }
            }
        }

        self.keepalive.stop();
        self.link.disconnect();
        self.channel_events = None;
        self.channel.stop().await
    }

    async fn start_channel(&mut self) {
        match self.channel.start().await {
            Ok(events) => {
                debug!("Control channel started");
                self.channel_events = Some(events);
            }
            Err(e) => {
                warn!("Control channel unavailable: {}", e);
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        if self.retry_at.is_none() {
            info!("Reconnecting control channel in {:?}", self.channel_retry);
            self.retry_at = Some(Instant::now() + self.channel_retry);
        }
    }

    async fn channel_lost(&mut self, reason: &str) {
        warn!("Control channel lost: {}", reason);
        self.keepalive.stop();
        self.channel_events = None;
        if let Err(e) = self.channel.stop().await {
            debug!("Control channel stop failed: {}", e);
        }
        self.schedule_retry();
    }

    async fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                info!("Control channel connected");
                self.keepalive.start();
            }
            ChannelEvent::Disconnected { reason } => {
                let reason = reason.unwrap_or_else(|| "disconnected".to_string());
                self.channel_lost(&reason).await;
            }
            ChannelEvent::Event { name, args } => {
                if let Dispatch::Host(request) = self.router.dispatch_args(&name, &args) {
                    match &self.host_requests {
                        Some(tx) => {
                            let _ = tx.send(request);
                        }
                        None => info!("Host request {:?} has no handler", request),
                    }
                }
            }
        }
    }

    async fn on_keepalive(&mut self, event: KeepaliveEvent) {
        match event {
            KeepaliveEvent::ChannelLost { epoch, reason } => {
                if epoch != self.keepalive.epoch() {
                    debug!("Ignoring keepalive failure from run {}", epoch);
                    return;
                }
                self.channel_lost(&format!("keepalive failed: {}", reason))
                    .await;
            }
        }
    }

    async fn on_link(&mut self, notification: LinkNotification) {
        self.handle_link(&notification).await;
        let dropped = match &self.link_listener {
            Some(tx) => tx.send(notification).is_err(),
            None => false,
        };
        if dropped {
            debug!("Link notification listener dropped");
            self.link_listener = None;
        }
    }

    async fn handle_link(&mut self, notification: &LinkNotification) {
        match notification {
            LinkNotification::Connected { accessory } => {
                info!("Accessory connected: {}", accessory);
            }
            LinkNotification::Disconnected { reason } => match reason {
                Some(reason) => info!("Accessory disconnected: {}", reason),
                None => info!("Accessory disconnected"),
            },
            LinkNotification::Ack(ack) => debug!("Ack received: {}", ack),
            LinkNotification::CommandSent(frame) => {
                debug!("Sent command {} {}", frame.command, frame.action)
            }
            LinkNotification::CommandFailed {
                command,
                action,
                reason,
            } => warn!("Command {} {} failed: {}", command, action, reason),
            LinkNotification::Frame(frame) => {
                let Some(reply) = self.router.reply_for(frame) else {
                    return;
                };
                if let Err(e) = self.channel.emit(&reply.event, reply.payload).await {
                    warn!("Couldn't publish {}: {}", reply.event, e);
                }
            }
        }
    }
}

async fn next_channel_event(events: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
