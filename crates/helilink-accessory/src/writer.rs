//! Ordered accessory writes
//!
//! A single worker thread per open link drains a FIFO of commands, builds
//! each frame and writes it. Commands are written in the order they were
//! queued; after the first failed write the worker reports the failure and
//! stops, and everything still queued is reported as failed.
//!
//! The sender lives behind a lock shared with the worker. Closing takes it
//! out, so a push either lands in the channel before the final drain or is
//! handed back to the caller.

use bytes::Bytes;
use helilink_core::{Action, Command, Frame};
use std::io::Write;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::manager::{LinkInput, LinkNotification};

pub(crate) struct WriteJob {
    pub command: Command,
    pub action: Action,
    pub payload: Bytes,
}

type SharedSender = Arc<Mutex<Option<std_mpsc::Sender<WriteJob>>>>;

pub(crate) struct WriteQueue {
    tx: SharedSender,
}

impl WriteQueue {
    pub(crate) fn spawn(
        mut writer: Box<dyn Write + Send>,
        epoch: u64,
        reader_alive: Arc<AtomicBool>,
        inputs: mpsc::UnboundedSender<LinkInput>,
        notifications: mpsc::UnboundedSender<LinkNotification>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<WriteJob>();
        let tx: SharedSender = Arc::new(Mutex::new(Some(tx)));
        let tx_thread = tx.clone();

        std::thread::Builder::new()
            .name(format!("helilink-writer-{}", epoch))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if tx_thread.lock().is_none() {
                        fail(&notifications, &job, "link closed");
                        continue;
                    }

                    let frame = match Frame::new(job.command, job.action, job.payload.clone()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Rejecting {} {}: {}", job.command, job.action, e);
                            fail(&notifications, &job, &e.to_string());
                            continue;
                        }
                    };

                    let result = if reader_alive.load(Ordering::Acquire) {
                        let bytes = frame.encode();
                        writer.write_all(&bytes).and_then(|_| writer.flush())
                    } else {
                        Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "read loop has ended",
                        ))
                    };

                    match result {
                        Ok(()) => {
                            debug!("Sent {} {} ({} bytes)", frame.command, frame.action, frame.size());
                            let _ = notifications.send(LinkNotification::CommandSent(frame));
                        }
                        Err(e) => {
                            error!("Failed to send command to accessory: {}", e);
                            fail(&notifications, &job, &e.to_string());
                            let _ = inputs.send(LinkInput::WriteFailed {
                                epoch,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    }
                }

                // Anything queued behind a failed write is never sent. With
                // the sender gone, recv ends once the channel is empty.
                tx_thread.lock().take();
                while let Ok(job) = rx.recv() {
                    fail(&notifications, &job, "link closed");
                }
                debug!("Write queue finished (epoch {})", epoch);
            })?;

        Ok(Self { tx })
    }

    /// Queue a command; returns the job back if the queue is closed
    pub(crate) fn push(&self, job: WriteJob) -> std::result::Result<(), WriteJob> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn fail(
    notifications: &mpsc::UnboundedSender<LinkNotification>,
    job: &WriteJob,
    reason: &str,
) {
    let _ = notifications.send(LinkNotification::CommandFailed {
        command: job.command,
        action: job.action,
        reason: reason.to_string(),
    });
}
