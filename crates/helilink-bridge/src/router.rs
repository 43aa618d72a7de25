//! Event router
//!
//! Turns control channel events into accessory commands, and accessory
//! frames back into reply events. Unknown or malformed input is logged and
//! dropped; dispatch never fails.

use bytes::Bytes;
use helilink_accessory::LinkManager;
use helilink_core::{Action, Command, Frame, PidReport};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::{EventAction, EventCategory};
use crate::mapping::{HostRequest, MappingTable, Route};

/// Destination for routed commands
pub trait CommandSink: Send + Sync {
    fn send_command(&self, command: Command, action: Action, payload: Bytes);
}

impl CommandSink for LinkManager {
    fn send_command(&self, command: Command, action: Action, payload: Bytes) {
        LinkManager::send_command(self, command, action, payload)
    }
}

/// Outcome of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Command handed to the sink
    Sent {
        command: Command,
        action: Action,
        payload: Bytes,
    },
    /// Function the host has to perform
    Host(HostRequest),
    /// Recognized event with nothing to do
    Ignored,
    /// Unknown or malformed event
    Dropped,
}

/// Event to publish on the control channel
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub event: String,
    pub payload: Value,
}

pub struct EventRouter {
    table: MappingTable,
    sink: Arc<dyn CommandSink>,
}

impl EventRouter {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self::with_table(sink, MappingTable::standard())
    }

    pub fn with_table(sink: Arc<dyn CommandSink>, table: MappingTable) -> Self {
        Self { table, sink }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Route one event with its type and optional data
    pub fn dispatch(&self, event: &str, event_type: &str, data: Option<&Value>) -> Dispatch {
        let category = EventCategory::parse(event);
        if category == EventCategory::Unknown {
            warn!("Unknown event received: {}", event);
            return Dispatch::Dropped;
        }

        let action = EventAction::parse(event_type);
        let Some(route) = self.table.resolve(category, action) else {
            warn!("Unknown event type for {}: {}", category, event_type);
            return Dispatch::Dropped;
        };

        match route {
            Route::Ignore => {
                debug!("Keeping alive");
                Dispatch::Ignored
            }
            Route::Host(request) => {
                debug!("Host request: {:?}", request);
                Dispatch::Host(request)
            }
            Route::Command {
                command,
                action: wire_action,
                payload,
            } => match payload.build(data) {
                Ok(payload) => {
                    debug!(
                        "Routing {}/{} to {} {} ({} bytes)",
                        category,
                        action,
                        command,
                        wire_action,
                        payload.len()
                    );
                    self.sink.send_command(command, wire_action, payload.clone());
                    Dispatch::Sent {
                        command,
                        action: wire_action,
                        payload,
                    }
                }
                Err(e) => {
                    warn!("Dropping {}/{}: {}", category, action, e);
                    Dispatch::Dropped
                }
            },
        }
    }

    /// Route an event as delivered by the channel
    ///
    /// Accepts `[type, data]` or a single `{"type": ..., "data": ...}`.
    pub fn dispatch_args(&self, event: &str, args: &[Value]) -> Dispatch {
        match split_args(args) {
            Some((event_type, data)) => self.dispatch(event, &event_type, data),
            None => {
                warn!("Missing event type for {}: {:?}", event, args);
                Dispatch::Dropped
            }
        }
    }

    /// Reply event for a frame sent by the accessory, if it has one
    pub fn reply_for(&self, frame: &Frame) -> Option<Reply> {
        match frame.action {
            Action::Tune => match PidReport::decode(&frame.payload) {
                Ok(report) => {
                    debug!("Sending tuning parameters: {:?}", report);
                    Some(Reply {
                        event: EventCategory::Response.name().to_string(),
                        payload: json!({
                            "type": EventAction::Tune.name(),
                            "data": report,
                        }),
                    })
                }
                Err(e) => {
                    warn!("Missing values to process tune reply: {}", e);
                    None
                }
            },
            _ => {
                debug!("No reply for {} {}", frame.command, frame.action);
                None
            }
        }
    }
}

fn split_args(args: &[Value]) -> Option<(String, Option<&Value>)> {
    match args.first()? {
        Value::String(event_type) => Some((event_type.clone(), args.get(1))),
        Value::Object(fields) => {
            let event_type = match fields.get("type")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((event_type, fields.get("data")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helilink_core::PidGains;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sink(Mutex<Vec<(Command, Action, Bytes)>>);

    impl CommandSink for Sink {
        fn send_command(&self, command: Command, action: Action, payload: Bytes) {
            self.0.lock().push((command, action, payload));
        }
    }

    #[test]
    fn test_split_args() {
        let args = [json!("sticks"), json!({"throttle": 1})];
        let (event_type, data) = split_args(&args).unwrap();
        assert_eq!(event_type, "sticks");
        assert_eq!(data, Some(&json!({"throttle": 1})));

        let args = [json!({"type": "tune", "data": {"kp": 1}})];
        let (event_type, data) = split_args(&args).unwrap();
        assert_eq!(event_type, "tune");
        assert_eq!(data, Some(&json!({"kp": 1})));

        let args = [json!({"type": "tune"})];
        assert_eq!(split_args(&args), Some(("tune".to_string(), None)));

        assert_eq!(split_args(&[]), None);
        assert_eq!(split_args(&[json!(5)]), None);
        assert_eq!(split_args(&[json!({"data": {}})]), None);
    }

    #[test]
    fn test_response_event_is_not_routed() {
        let sink = Arc::new(Sink::default());
        let router = EventRouter::new(sink.clone());

        assert_eq!(
            router.dispatch("response", "tune", Some(&json!({}))),
            Dispatch::Dropped
        );
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_reply_needs_full_report() {
        let router = EventRouter::new(Arc::new(Sink::default()));

        let short = Frame::new(Command::Response, Action::Tune, vec![0u8; 12]).unwrap();
        assert_eq!(router.reply_for(&short), None);

        let other = Frame::new(Command::Response, Action::Sticks, vec![0u8; 36]).unwrap();
        assert_eq!(router.reply_for(&other), None);

        let report = PidReport {
            pitch: PidGains::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let full = Frame::new(Command::Response, Action::Tune, report.encode()).unwrap();
        assert!(router.reply_for(&full).is_some());
    }
}
