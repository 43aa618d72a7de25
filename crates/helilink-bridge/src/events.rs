//! Control channel event vocabulary
//!
//! Event names and event types arrive as free-form strings. Both resolve
//! to closed enumerations by exact, case-insensitive lookup; anything else
//! becomes `Unknown`.

use std::fmt;

/// Event name: the category an operator intent belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Actuation (`control`)
    Control,
    /// Passthrough to the host (`function`)
    Function,
    /// Channel heartbeat (`keep_alive`)
    KeepAlive,
    /// Parameter changes (`settings`)
    Settings,
    /// Queries (`get`)
    Get,
    /// Replies published upward (`response`)
    Response,
    Unknown,
}

impl EventCategory {
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Control,
        EventCategory::Function,
        EventCategory::KeepAlive,
        EventCategory::Settings,
        EventCategory::Get,
        EventCategory::Response,
    ];

    /// Event names the bridge subscribes to on the control channel
    pub const INBOUND: [EventCategory; 5] = [
        EventCategory::Control,
        EventCategory::Function,
        EventCategory::KeepAlive,
        EventCategory::Settings,
        EventCategory::Get,
    ];

    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|category| category.name().eq_ignore_ascii_case(name))
            .unwrap_or(EventCategory::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventCategory::Control => "control",
            EventCategory::Function => "function",
            EventCategory::KeepAlive => "keep_alive",
            EventCategory::Settings => "settings",
            EventCategory::Get => "get",
            EventCategory::Response => "response",
            EventCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event type: the concrete action within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    LeftStick,
    RightStick,
    Power,
    TakePicture,
    ToggleMusic,
    KeepAlive,
    Sticks,
    Standby,
    Tune,
    Tilt,
    CalibrateTilt,
    TiltOffset,
    Unknown,
}

impl EventAction {
    pub const ALL: [EventAction; 12] = [
        EventAction::LeftStick,
        EventAction::RightStick,
        EventAction::Power,
        EventAction::TakePicture,
        EventAction::ToggleMusic,
        EventAction::KeepAlive,
        EventAction::Sticks,
        EventAction::Standby,
        EventAction::Tune,
        EventAction::Tilt,
        EventAction::CalibrateTilt,
        EventAction::TiltOffset,
    ];

    pub fn parse(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(name))
            .unwrap_or(EventAction::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            EventAction::LeftStick => "left_stick",
            EventAction::RightStick => "right_stick",
            EventAction::Power => "power",
            EventAction::TakePicture => "take_picture",
            EventAction::ToggleMusic => "toggle_music",
            EventAction::KeepAlive => "keep_alive",
            EventAction::Sticks => "sticks",
            EventAction::Standby => "standby",
            EventAction::Tune => "tune",
            EventAction::Tilt => "tilt",
            EventAction::CalibrateTilt => "calibrate_tilt",
            EventAction::TiltOffset => "tilt_offset",
            EventAction::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
