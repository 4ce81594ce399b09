// MIT License - Copyright (c) 2026 Peter Wright
// Heater word bitfields, hex wire words and mesh addresses

use std::fmt;
use std::str::FromStr;

use crate::constants::{
    HEATER_CLASS_MASK, HEATER_CLASS_SHIFT, HEATER_MAX_TEMPERATURE, HEATER_MIN_TEMPERATURE,
    HEATER_MODE_MASK, HEATER_TEMP_MASK, HEATER_TEMP_SHIFT, HeaterMode, MAX_LEVEL,
    RELAY_CLOSED_WORD, RELAY_OPEN_WORD,
};
use crate::error::{DoozError, Result};

/// Unicast or group address of a mesh output.
///
/// On the wire this is a 4-digit uppercase hex string (e.g. `"0002"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u16);

impl Address {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Parse a wire address. Lowercase digits are accepted.
    pub fn parse(s: &str) -> Result<Self> {
        parse_word(s)
            .map(Self)
            .map_err(|_| DoozError::InvalidAddress {
                value: s.to_string(),
            })
    }
}

impl FromStr for Address {
    type Err = DoozError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_word(self.0))
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Format a 16-bit word as the hub expects: uppercase hex, zero-padded to 4.
pub fn format_word(word: u16) -> String {
    format!("{:04X}", word)
}

/// Parse a hex wire word. An optional `0x` prefix is tolerated.
pub fn parse_word(s: &str) -> Result<u16> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 4 {
        return Err(DoozError::Decode {
            details: format!("not a 16-bit hex word: {:?}", s),
        });
    }
    u16::from_str_radix(digits, 16).map_err(|_| DoozError::Decode {
        details: format!("not a 16-bit hex word: {:?}", s),
    })
}

/// Validate a light/shutter level (0-100).
pub fn check_level(level: u32) -> Result<u8> {
    if level > MAX_LEVEL as u32 {
        return Err(DoozError::InvalidLevel {
            level,
            max: MAX_LEVEL,
        });
    }
    Ok(level as u8)
}

/// Command class carried in the top three bits of a heater word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Class 0: set mode (mode bits only).
    SetMode,
    /// Class 3: set override temperature (temperature bits only).
    SetOverride,
    /// Class 4: status query / status report (mode bits).
    Status,
    /// Any class this bridge does not interpret.
    Other(u8),
}

impl CommandClass {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::SetMode,
            3 => Self::SetOverride,
            4 => Self::Status,
            other => Self::Other(other & 0x07),
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            Self::SetMode => 0,
            Self::SetOverride => 3,
            Self::Status => 4,
            Self::Other(b) => *b & 0x07,
        }
    }

    /// Whether a word of this class carries the heater mode.
    pub fn carries_mode(&self) -> bool {
        matches!(self, Self::SetMode | Self::Status)
    }

    /// Whether a word of this class carries the target temperature.
    pub fn carries_temperature(&self) -> bool {
        matches!(self, Self::SetOverride)
    }
}

/// A heater word split into its three fields.
///
/// Temperature is kept in half-degree units so that encode/decode is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterWord {
    pub class: CommandClass,
    pub half_degrees: u8,
    pub mode_id: u8,
}

impl HeaterWord {
    /// Split a raw word into class, temperature and mode fields.
    ///
    /// Callers must route relay sentinels away first; see [`RawWord::decode`].
    fn from_bits(raw: u16) -> Self {
        Self {
            class: CommandClass::from_bits(((raw & HEATER_CLASS_MASK) >> HEATER_CLASS_SHIFT) as u8),
            half_degrees: ((raw & HEATER_TEMP_MASK) >> HEATER_TEMP_SHIFT) as u8,
            mode_id: (raw & HEATER_MODE_MASK) as u8,
        }
    }

    pub fn encode(&self) -> u16 {
        ((self.class.bits() as u16) << HEATER_CLASS_SHIFT)
            | (((self.half_degrees as u16) << HEATER_TEMP_SHIFT) & HEATER_TEMP_MASK)
            | (self.mode_id as u16 & HEATER_MODE_MASK)
    }

    pub fn temperature(&self) -> f32 {
        self.half_degrees as f32 / 2.0
    }

    pub fn mode(&self) -> Result<HeaterMode> {
        HeaterMode::from_u8(self.mode_id).ok_or(DoozError::UnknownHeaterMode { id: self.mode_id })
    }
}

/// A raw 16-bit value received from a heater output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawWord {
    RelayOpen,
    RelayClosed,
    Heater(HeaterWord),
}

impl RawWord {
    pub fn decode(raw: u16) -> Self {
        match raw {
            RELAY_OPEN_WORD => Self::RelayOpen,
            RELAY_CLOSED_WORD => Self::RelayClosed,
            _ => Self::Heater(HeaterWord::from_bits(raw)),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        parse_word(s).map(Self::decode)
    }
}

/// Commands the bridge synthesizes for heater outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterCommand {
    /// Ask the heater to report its current mode.
    QueryStatus,
    /// Switch mode. Only PRESENT and OFF are driven by the on/off control.
    SetMode(HeaterMode),
    /// Override the target temperature (Celsius, rounded to 0.5°).
    SetOverride(f32),
}

impl HeaterCommand {
    pub fn encode(&self) -> Result<u16> {
        let word = match *self {
            HeaterCommand::QueryStatus => HeaterWord {
                class: CommandClass::Status,
                half_degrees: 0,
                mode_id: 0,
            },
            HeaterCommand::SetMode(mode) => HeaterWord {
                class: CommandClass::SetMode,
                half_degrees: 0,
                mode_id: mode.id(),
            },
            HeaterCommand::SetOverride(celsius) => HeaterWord {
                class: CommandClass::SetOverride,
                half_degrees: half_degrees(celsius)?,
                mode_id: 0,
            },
        };
        Ok(word.encode())
    }

    /// Hex form placed in the `raw` field of a `set` request.
    pub fn to_wire(&self) -> Result<String> {
        self.encode().map(format_word)
    }
}

/// Convert a setpoint to half-degree units, rejecting out-of-range values.
pub fn half_degrees(celsius: f32) -> Result<u8> {
    if !celsius.is_finite() || !(HEATER_MIN_TEMPERATURE..=HEATER_MAX_TEMPERATURE).contains(&celsius) {
        return Err(DoozError::InvalidTemperature { value: celsius });
    }
    Ok((celsius * 2.0).round() as u8)
}
