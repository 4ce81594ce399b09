// MIT License - Copyright (c) 2026 Peter Wright
// Device records and per-kind state

pub mod heater;
pub mod light;
pub mod scene;
pub mod shutter;

use bitflags::bitflags;
use serde::Serialize;

use crate::codec::Address;
use crate::constants::DeviceKind;
use crate::store::GroupHandle;

pub use heater::{DisplayUnit, HeaterState, HeatingState, RelayState};
pub use light::LightState;
pub use scene::Scene;
pub use shutter::{Movement, ShutterState};

bitflags! {
    /// Fields of a device's state touched by an update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateChange: u16 {
        const ON                 = 0b0000_0000_0001;
        const BRIGHTNESS         = 0b0000_0000_0010;
        const LEVEL              = 0b0000_0000_0100;
        const TARGET             = 0b0000_0000_1000;
        const MOVEMENT           = 0b0000_0001_0000;
        const MODE               = 0b0000_0010_0000;
        const HEATING            = 0b0000_0100_0000;
        const TARGET_TEMPERATURE = 0b0000_1000_0000;
        const DISPLAY_UNIT       = 0b0001_0000_0000;
        const RELAY              = 0b0010_0000_0000;
    }
}

const CHANGE_NAMES: [(StateChange, &str); 10] = [
    (StateChange::ON, "on"),
    (StateChange::BRIGHTNESS, "brightness"),
    (StateChange::LEVEL, "level"),
    (StateChange::TARGET, "target"),
    (StateChange::MOVEMENT, "movement"),
    (StateChange::MODE, "mode"),
    (StateChange::HEATING, "heating"),
    (StateChange::TARGET_TEMPERATURE, "target_temperature"),
    (StateChange::DISPLAY_UNIT, "display_unit"),
    (StateChange::RELAY, "relay"),
];

impl StateChange {
    /// Field names of the set flags, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        CHANGE_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Whether the change can move a group aggregate.
    pub fn affects_groups(&self) -> bool {
        self.intersects(
            Self::ON | Self::BRIGHTNESS | Self::LEVEL | Self::TARGET | Self::MOVEMENT,
        )
    }
}

/// Kind-specific state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceState {
    Light(LightState),
    Shutter(ShutterState),
    Heater(HeaterState),
}

impl DeviceState {
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Shutter => Self::Shutter(ShutterState::default()),
            DeviceKind::Heater => Self::Heater(HeaterState::default()),
            _ => Self::Light(LightState::default()),
        }
    }

    pub fn as_light(&self) -> Option<&LightState> {
        match self {
            Self::Light(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shutter(&self) -> Option<&ShutterState> {
        match self {
            Self::Shutter(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_heater(&self) -> Option<&HeaterState> {
        match self {
            Self::Heater(s) => Some(s),
            _ => None,
        }
    }
}

/// A discovered output.
#[derive(Debug, Clone)]
pub struct Device {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub mac: Option<String>,
    pub kind: DeviceKind,
    pub state: DeviceState,
    /// Groups this device is a member of.
    pub groups: Vec<GroupHandle>,
}

impl Device {
    pub fn new(address: Address, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            address,
            name: name.into(),
            room: None,
            mac: None,
            kind,
            state: DeviceState::for_kind(kind),
            groups: Vec::new(),
        }
    }

    /// Name shown to users: `"<name> - <room>"` when the room is known.
    pub fn display_name(&self) -> String {
        match &self.room {
            Some(room) => format!("{} - {}", self.name, room),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_for_kind() {
        assert!(DeviceState::for_kind(DeviceKind::Dimmer).as_light().is_some());
        assert!(DeviceState::for_kind(DeviceKind::Pulse).as_light().is_some());
        assert!(DeviceState::for_kind(DeviceKind::Shutter).as_shutter().is_some());
        assert!(DeviceState::for_kind(DeviceKind::Heater).as_heater().is_some());
    }

    #[test]
    fn test_change_names() {
        let changed = StateChange::LEVEL | StateChange::ON;
        assert_eq!(changed.names(), vec!["on", "level"]);
        assert!(changed.affects_groups());
        assert!(!StateChange::RELAY.affects_groups());
    }

    #[test]
    fn test_display_name() {
        let mut device = Device::new(Address::new(2), "Ceiling", DeviceKind::Dimmer);
        assert_eq!(device.display_name(), "Ceiling");
        device.room = Some("Kitchen".into());
        assert_eq!(device.display_name(), "Ceiling - Kitchen");
    }

    #[test]
    fn test_state_serializes_with_type_tag() {
        let json = serde_json::to_value(DeviceState::for_kind(DeviceKind::Shutter)).unwrap();
        assert_eq!(json["type"], "shutter");
        assert_eq!(json["movement"], "stopped");
    }
}
