//! Accessory read loop
//!
//! One dedicated thread per open link blocks on the accessory's reader.
//! Every non-empty read is decoded and handed to the notification queue;
//! listener code never runs on this thread. The loop ends on EOF or on the
//! first real I/O error and only records that fact: tearing the link down
//! is left to the next failed write or to an explicit disconnect.

use helilink_core::{codec, Inbound, READ_BUFFER_SIZE};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::manager::LinkNotification;

pub(crate) struct ReadLoop {
    alive: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

impl ReadLoop {
    pub(crate) fn spawn(
        mut reader: Box<dyn Read + Send>,
        epoch: u64,
        notifications: mpsc::UnboundedSender<LinkNotification>,
    ) -> std::io::Result<Self> {
        let alive = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        let alive_thread = alive.clone();
        let stop_thread = stop.clone();

        let thread = std::thread::Builder::new()
            .name(format!("helilink-reader-{}", epoch))
            .spawn(move || {
                let mut buf = vec![0u8; READ_BUFFER_SIZE];

                while !stop_thread.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            debug!("Accessory stream reached EOF (epoch {})", epoch);
                            break;
                        }
                        Ok(n) => {
                            if stop_thread.load(Ordering::Acquire) {
                                break;
                            }
                            deliver(&buf[..n], &notifications);
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                            ) =>
                        {
                            continue;
                        }
                        Err(e) => {
                            debug!("Accessory read failed (epoch {}): {}", epoch, e);
                            break;
                        }
                    }
                }

                alive_thread.store(false, Ordering::Release);
                debug!("Read loop finished (epoch {})", epoch);
            })?;

        Ok(Self {
            alive,
            stop,
            _thread: thread,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Shared liveness flag, consulted by the writer before each write
    pub(crate) fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    /// Ask the loop to stop after its current read
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn deliver(data: &[u8], notifications: &mpsc::UnboundedSender<LinkNotification>) {
    match codec::decode(data) {
        Ok(Inbound::Ack(ack)) => {
            trace!("Accessory ack: {}", ack);
            let _ = notifications.send(LinkNotification::Ack(ack));
        }
        Ok(Inbound::Frame(frame)) => {
            debug!(
                "Accessory frame: {} {} ({} bytes)",
                frame.command,
                frame.action,
                frame.payload.len()
            );
            let _ = notifications.send(LinkNotification::Frame(frame));
        }
        Err(e) => {
            warn!("Dropping {} bytes from accessory: {}", data.len(), e);
        }
    }
}
