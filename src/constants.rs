// MIT License - Copyright (c) 2026 Peter Wright
// Protocol constants

use serde::{Deserialize, Serialize};

/// Default TCP port of the hub's JSON-RPC endpoint.
pub const DEFAULT_HUB_PORT: u16 = 55055;

/// Raw word reported when a heater's relay opens. Not a bitfield value.
pub const RELAY_OPEN_WORD: u16 = 0x8000;
/// Raw word reported when a heater's relay closes. Not a bitfield value.
pub const RELAY_CLOSED_WORD: u16 = 0x7FFF;

/// Heater word layout: `ccc ttttttt mmmmmm` (class, half-degrees, mode).
pub const HEATER_CLASS_SHIFT: u16 = 13;
pub const HEATER_CLASS_MASK: u16 = 0xE000;
pub const HEATER_TEMP_SHIFT: u16 = 6;
pub const HEATER_TEMP_MASK: u16 = 0x1FC0;
pub const HEATER_MODE_MASK: u16 = 0x003F;

/// Accepted heater setpoint range, in degrees Celsius.
pub const HEATER_MIN_TEMPERATURE: f32 = 10.0;
pub const HEATER_MAX_TEMPERATURE: f32 = 38.0;

/// Highest level a light or shutter accepts.
pub const MAX_LEVEL: u8 = 100;

/// How long a scene switch stays "on" after it is triggered.
pub const SCENE_PULSE_MS: u64 = 4000;

/// RPC method names understood by the hub.
pub mod method {
    pub const AUTHENTICATE: &str = "authenticate";
    pub const DISCOVER: &str = "discover";
    pub const DISCOVER_GROUPS: &str = "discover_groups";
    pub const DISCOVER_SCENES: &str = "discover_scenes";
    pub const GET: &str = "get";
    pub const SET: &str = "set";
    pub const SET_SCENARIO: &str = "set_scenario";
    /// Unsolicited state change pushed by the hub.
    pub const NOTIFY_STATE: &str = "notify_state";
}

/// JSON-RPC 2.0 error codes used for locally detected protocol errors.
pub mod rpc_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const UNKNOWN: i64 = -32000;
}

/// Equipment type, as reported in the `output conf` field of discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceKind {
    OnOff = 0,
    Dimmer = 1,
    Relay = 2,
    Shutter = 3,
    Heater = 4,
    Pulse = 5,
}

impl DeviceKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::OnOff),
            1 => Some(Self::Dimmer),
            2 => Some(Self::Relay),
            3 => Some(Self::Shutter),
            4 => Some(Self::Heater),
            5 => Some(Self::Pulse),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::OnOff => "On/Off",
            Self::Dimmer => "Dimmer",
            Self::Relay => "Relay",
            Self::Shutter => "Shutter",
            Self::Heater => "Heater",
            Self::Pulse => "Pulse",
        }
    }

    /// Whether state for this kind is carried as a plain 0-100 level
    /// with on/off semantics.
    pub fn is_light(&self) -> bool {
        matches!(self, Self::OnOff | Self::Dimmer | Self::Relay | Self::Pulse)
    }
}

/// Heater operating mode carried in the low six bits of a heater word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum HeaterMode {
    Present = 0,
    Absent = 1,
    Night = 2,
    FrostFree = 3,
    Off = 4,
    Auto = 5,
}

impl HeaterMode {
    pub const ALL: [HeaterMode; 6] = [
        Self::Present,
        Self::Absent,
        Self::Night,
        Self::FrostFree,
        Self::Off,
        Self::Auto,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Present),
            1 => Some(Self::Absent),
            2 => Some(Self::Night),
            3 => Some(Self::FrostFree),
            4 => Some(Self::Off),
            5 => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Night => "NIGHT",
            Self::FrostFree => "FROSTFREE",
            Self::Off => "OFF",
            Self::Auto => "AUTO",
        }
    }

    /// Every mode except OFF means the heater is regulating.
    pub fn is_heating(&self) -> bool {
        !matches!(self, Self::Off)
    }
}
