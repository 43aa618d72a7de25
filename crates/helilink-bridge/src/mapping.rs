//! Event mapping table
//!
//! Maps (event category, event action) pairs onto accessory commands and
//! builds their payloads from loosely typed JSON. The table is built once
//! and never changes.
//!
//! Field extraction is forgiving:
//! - missing or unreadable numbers are 0, missing booleans are false
//! - numbers sent as strings are parsed (settings forms send text)
//! - integers are truncated to a byte, wrapping on overflow

use bytes::Bytes;
use helilink_core::{Action, Command, PidGains, Standby, StickPositions, TuneAxis, TuneSettings};
use serde_json::Value;

use crate::events::{EventAction, EventCategory};
use crate::{BridgeError, Result};

/// Request for a host-side function the bridge does not perform itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRequest {
    TakePicture,
    ToggleMusic,
}

/// Builds the payload of a mapped command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadBuilder {
    /// throttle, pitch, roll, yaw as signed bytes
    Sticks,
    /// `on` as 1/0
    Standby,
    /// `type` byte then kp, ki, kd as little-endian f32
    Tune,
    /// No payload
    Empty,
}

impl PayloadBuilder {
    pub fn requires_data(self) -> bool {
        !matches!(self, PayloadBuilder::Empty)
    }

    pub fn build(self, data: Option<&Value>) -> Result<Bytes> {
        let data = match (self, data) {
            (PayloadBuilder::Empty, _) => return Ok(Bytes::new()),
            (_, Some(data)) if !data.is_null() => data,
            _ => {
                return Err(BridgeError::Mapping(
                    "missing data argument".to_string(),
                ))
            }
        };

        Ok(match self {
            PayloadBuilder::Sticks => StickPositions {
                throttle: int_field(data, "throttle") as i8,
                pitch: int_field(data, "pitch") as i8,
                roll: int_field(data, "roll") as i8,
                yaw: int_field(data, "yaw") as i8,
            }
            .encode(),
            PayloadBuilder::Standby => Standby {
                on: bool_field(data, "on"),
            }
            .encode(),
            PayloadBuilder::Tune => TuneSettings {
                axis: TuneAxis::from_u8(int_field(data, "type") as u8),
                gains: PidGains::new(
                    float_field(data, "kp") as f32,
                    float_field(data, "ki") as f32,
                    float_field(data, "kd") as f32,
                ),
            }
            .encode(),
            PayloadBuilder::Empty => Bytes::new(),
        })
    }
}

/// What a recognized event turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Send a command to the accessory
    Command {
        command: Command,
        action: Action,
        payload: PayloadBuilder,
    },
    /// Hand off to the hosting application
    Host(HostRequest),
    /// Recognized, nothing to do
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMapping {
    pub category: EventCategory,
    /// `None` matches every action of the category
    pub action: Option<EventAction>,
    pub route: Route,
}

impl EventMapping {
    fn matches(&self, category: EventCategory, action: EventAction) -> bool {
        self.category == category && self.action.map_or(true, |a| a == action)
    }
}

/// Immutable mapping table
#[derive(Debug, Clone)]
pub struct MappingTable {
    mappings: Vec<EventMapping>,
}

impl MappingTable {
    pub fn new(mappings: Vec<EventMapping>) -> Self {
        Self { mappings }
    }

    /// The flight controller's command set
    pub fn standard() -> Self {
        fn command(
            category: EventCategory,
            action: EventAction,
            command: Command,
            wire_action: Action,
            payload: PayloadBuilder,
        ) -> EventMapping {
            EventMapping {
                category,
                action: Some(action),
                route: Route::Command {
                    command,
                    action: wire_action,
                    payload,
                },
            }
        }

        Self::new(vec![
            command(
                EventCategory::Control,
                EventAction::Sticks,
                Command::Control,
                Action::Sticks,
                PayloadBuilder::Sticks,
            ),
            command(
                EventCategory::Control,
                EventAction::Standby,
                Command::Control,
                Action::Standby,
                PayloadBuilder::Standby,
            ),
            command(
                EventCategory::Settings,
                EventAction::Tune,
                Command::Settings,
                Action::Tune,
                PayloadBuilder::Tune,
            ),
            command(
                EventCategory::Get,
                EventAction::Tune,
                Command::Get,
                Action::Tune,
                PayloadBuilder::Empty,
            ),
            EventMapping {
                category: EventCategory::Function,
                action: Some(EventAction::TakePicture),
                route: Route::Host(HostRequest::TakePicture),
            },
            EventMapping {
                category: EventCategory::Function,
                action: Some(EventAction::ToggleMusic),
                route: Route::Host(HostRequest::ToggleMusic),
            },
            EventMapping {
                category: EventCategory::KeepAlive,
                action: None,
                route: Route::Ignore,
            },
        ])
    }

    pub fn resolve(&self, category: EventCategory, action: EventAction) -> Option<Route> {
        self.mappings
            .iter()
            .find(|m| m.matches(category, action))
            .map(|m| m.route)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

pub(crate) fn int_field(data: &Value, key: &str) -> i64 {
    match data.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| parse_number(s).map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn float_field(data: &Value, key: &str) -> f64 {
    match data.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_number(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn bool_field(data: &Value, key: &str) -> bool {
    match data.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
