//! Command and action enumerations
//!
//! Both ids are stable on the wire and must round-trip through
//! [`Command::from_u8`] / [`Action::from_u8`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Accessory command (byte 0 of a frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Command {
    /// Actuate the motors
    Control = 1,
    /// Change a persistent setting on the device
    Settings = 2,
    /// Ask the device for a value
    Get = 3,
    /// Acknowledgement from the device
    Ack = 4,
    /// Reply to a previous `Get`
    Response = 5,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Control,
        Command::Settings,
        Command::Get,
        Command::Ack,
        Command::Response,
    ];

    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Command::Control),
            2 => Some(Command::Settings),
            3 => Some(Command::Get),
            4 => Some(Command::Ack),
            5 => Some(Command::Response),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Control => "Control",
            Command::Settings => "Settings",
            Command::Get => "Get",
            Command::Ack => "ACK",
            Command::Response => "Response",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Command {
    type Error = crate::Error;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Command::from_u8(val).ok_or(crate::Error::UnknownCommand(val))
    }
}

/// Accessory action (byte 1 of a frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Action {
    LeftStick = 1,
    RightStick = 2,
    /// All four stick channels at once
    Sticks = 3,
    Standby = 4,
    /// PID gains
    Tune = 5,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::LeftStick,
        Action::RightStick,
        Action::Sticks,
        Action::Standby,
        Action::Tune,
    ];

    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(Action::LeftStick),
            2 => Some(Action::RightStick),
            3 => Some(Action::Sticks),
            4 => Some(Action::Standby),
            5 => Some(Action::Tune),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::LeftStick => "Left Stick",
            Action::RightStick => "Right Stick",
            Action::Sticks => "Sticks",
            Action::Standby => "Standby",
            Action::Tune => "Tune",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Action {
    type Error = crate::Error;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Action::from_u8(val).ok_or(crate::Error::UnknownAction(val))
    }
}
