//! Keepalive scheduler
//!
//! While the control channel is up, the server is probed periodically
//! (first probe immediately). A failed probe counts as a lost channel: the
//! timer stops and one [`KeepaliveEvent::ChannelLost`] is sent. Reconnecting
//! the channel is up to the listener.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::Result;

/// Default interval between probes
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest accepted interval between probes
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(10);

/// Server liveness check
#[async_trait]
pub trait LivenessProbe: Send + Sync + 'static {
    async fn probe(&self) -> Result<()>;
}

/// Events from the keepalive scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// A probe failed; `epoch` is the run that failed
    ChannelLost { epoch: u64, reason: String },
}

pub struct KeepaliveScheduler {
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
    events: mpsc::UnboundedSender<KeepaliveEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    epoch: AtomicU64,
}

impl KeepaliveScheduler {
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        mut interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<KeepaliveEvent>) {
        if interval < MIN_KEEPALIVE_INTERVAL {
            warn!(
                "Keepalive interval {:?} is too short, using {:?}",
                interval, MIN_KEEPALIVE_INTERVAL
            );
            interval = MIN_KEEPALIVE_INTERVAL;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                probe,
                interval,
                events: tx,
                task: Mutex::new(None),
                epoch: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// (Re)start probing, replacing any previous run; returns the new epoch
    pub fn start(&self) -> u64 {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let probe = self.probe.clone();
        let events = self.events.clone();
        let period = self.interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                debug!("Trying to keepalive");
                if let Err(e) = probe.probe().await {
                    error!("Couldn't keepalive: {}", e);
                    let _ = events.send(KeepaliveEvent::ChannelLost {
                        epoch,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }));

        info!("Keepalive started (every {:?})", period);
        epoch
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Keepalive stopped");
        }
    }

    /// Check if a run is active and has not failed
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Epoch of the latest run; older `ChannelLost` events are stale
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for KeepaliveScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpProbe;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::BridgeError;

    /// HTTP GET against `<server>/keepalive`; any 2xx answer is alive
    #[derive(Debug, Clone)]
    pub struct HttpProbe {
        client: reqwest::Client,
        url: String,
    }

    impl HttpProbe {
        pub fn new(server_url: &str, path: &str, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| BridgeError::Probe(format!("HTTP client error: {}", e)))?;

            Ok(Self {
                client,
                url: keepalive_url(server_url, path),
            })
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl LivenessProbe for HttpProbe {
        async fn probe(&self) -> Result<()> {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| BridgeError::Probe(format!("{}: {}", self.url, e)))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(BridgeError::Probe(format!("{} answered {}", self.url, status)))
            }
        }
    }

    pub(crate) fn keepalive_url(server_url: &str, path: &str) -> String {
        format!(
            "{}/{}",
            server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

}
