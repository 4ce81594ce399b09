// MIT License - Copyright (c) 2026 Peter Wright
// Pilot-wire heater outputs

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::StateChange;
use crate::codec::{CommandClass, RawWord};
use crate::constants::HeaterMode;
use crate::error::Result;

/// Heating state derived from the heater mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatingState {
    #[default]
    Off,
    Heat,
}

impl HeatingState {
    pub fn from_mode(mode: HeaterMode) -> Self {
        if mode.is_heating() { Self::Heat } else { Self::Off }
    }

    /// Only OFF stops heating; every other id heats, known or not.
    pub fn from_mode_id(id: u8) -> Self {
        if id == HeaterMode::Off.id() { Self::Off } else { Self::Heat }
    }
}

/// Unit the accessory layer should display temperatures in. Never sent to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Position of the heater's relay, reported with sentinel words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct HeaterState {
    pub mode: Option<HeaterMode>,
    pub heating: HeatingState,
    pub target_heating: HeatingState,
    pub target_temperature: Option<f32>,
    /// The hub does not report a room temperature for pilot-wire outputs.
    pub current_temperature: Option<f32>,
    pub display_unit: DisplayUnit,
    pub relay: Option<RelayState>,
}

impl HeaterState {
    /// Apply a raw word from a report or notification.
    ///
    /// Relay sentinels only move the relay. Mode classes (set/status) only
    /// touch mode and heating; the override class only touches the target
    /// temperature; other classes are ignored.
    pub fn apply_word(&mut self, raw: u16) -> Result<StateChange> {
        let word = match RawWord::decode(raw) {
            RawWord::RelayOpen => return Ok(self.set_relay(RelayState::Open)),
            RawWord::RelayClosed => return Ok(self.set_relay(RelayState::Closed)),
            RawWord::Heater(word) => word,
        };

        let mut changed = StateChange::empty();
        if word.class.carries_mode() {
            changed |= self.set_mode_id(word.mode_id);
        } else if word.class.carries_temperature() {
            let temperature = word.temperature();
            if self.target_temperature != Some(temperature) {
                self.target_temperature = Some(temperature);
                changed |= StateChange::TARGET_TEMPERATURE;
            }
        } else if let CommandClass::Other(class) = word.class {
            debug!("Ignoring heater word {:04X} of class {}", raw, class);
        }
        Ok(changed)
    }

    pub fn set_mode(&mut self, mode: HeaterMode) -> StateChange {
        self.update_mode(Some(mode), HeatingState::from_mode(mode))
    }

    /// Apply a mode id as reported by the hub. Ids outside the known modes
    /// leave `mode` unset but still count as heating.
    pub fn set_mode_id(&mut self, id: u8) -> StateChange {
        let mode = HeaterMode::from_u8(id);
        if mode.is_none() {
            debug!("Heater reported unknown mode id {}", id);
        }
        self.update_mode(mode, HeatingState::from_mode_id(id))
    }

    fn update_mode(&mut self, mode: Option<HeaterMode>, heating: HeatingState) -> StateChange {
        let mut changed = StateChange::empty();
        if self.mode != mode {
            self.mode = mode;
            changed |= StateChange::MODE;
        }
        if self.heating != heating {
            self.heating = heating;
            changed |= StateChange::HEATING;
        }
        if self.target_heating != heating {
            self.target_heating = heating;
            changed |= StateChange::HEATING;
        }
        changed
    }

    pub fn set_display_unit(&mut self, unit: DisplayUnit) -> StateChange {
        if self.display_unit == unit {
            return StateChange::empty();
        }
        self.display_unit = unit;
        StateChange::DISPLAY_UNIT
    }

    fn set_relay(&mut self, relay: RelayState) -> StateChange {
        debug!("Heater relay {:?}", relay);
        if self.relay == Some(relay) {
            return StateChange::empty();
        }
        self.relay = Some(relay);
        StateChange::RELAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeaterCommand;

    #[test]
    fn test_status_word_sets_mode_only() {
        let mut heater = HeaterState::default();
        heater.target_temperature = Some(19.0);
        // class 4, temperature bits set, mode NIGHT
        let raw = (4 << 13) | (42 << 6) | 2;
        let changed = heater.apply_word(raw).unwrap();
        assert_eq!(heater.mode, Some(HeaterMode::Night));
        assert_eq!(heater.heating, HeatingState::Heat);
        assert_eq!(heater.target_temperature, Some(19.0));
        assert!(changed.contains(StateChange::MODE | StateChange::HEATING));
        assert!(!changed.contains(StateChange::TARGET_TEMPERATURE));
    }

    #[test]
    fn test_off_mode() {
        let mut heater = HeaterState::default();
        heater.apply_word(HeaterCommand::SetMode(HeaterMode::Present).encode().unwrap()).unwrap();
        heater.apply_word(HeaterCommand::SetMode(HeaterMode::Off).encode().unwrap()).unwrap();
        assert_eq!(heater.mode, Some(HeaterMode::Off));
        assert_eq!(heater.heating, HeatingState::Off);
        assert_eq!(heater.target_heating, HeatingState::Off);
    }

    #[test]
    fn test_override_word_sets_temperature_only() {
        let mut heater = HeaterState::default();
        heater.set_mode(HeaterMode::Present);
        let raw = HeaterCommand::SetOverride(21.5).encode().unwrap();
        let changed = heater.apply_word(raw).unwrap();
        assert_eq!(changed, StateChange::TARGET_TEMPERATURE);
        assert_eq!(heater.target_temperature, Some(21.5));
        // mode bits are zero in an override word but must not reset the mode
        assert_eq!(heater.mode, Some(HeaterMode::Present));
    }

    #[test]
    fn test_sentinels_only_move_relay() {
        let mut heater = HeaterState::default();
        heater.set_mode(HeaterMode::Absent);
        let before = heater;
        assert_eq!(heater.apply_word(0x8000).unwrap(), StateChange::RELAY);
        assert_eq!(heater.relay, Some(RelayState::Open));
        assert_eq!(heater.apply_word(0x7FFF).unwrap(), StateChange::RELAY);
        assert_eq!(heater.relay, Some(RelayState::Closed));
        assert_eq!(heater.mode, before.mode);
        assert_eq!(heater.target_temperature, before.target_temperature);
    }

    #[test]
    fn test_other_classes_ignored() {
        let mut heater = HeaterState::default();
        let changed = heater.apply_word((1 << 13) | (40 << 6) | 1).unwrap();
        assert!(changed.is_empty());
        assert_eq!(heater, HeaterState::default());
    }

    #[test]
    fn test_unknown_mode_id_heats() {
        let mut heater = HeaterState::default();
        let changed = heater.apply_word((4 << 13) | 6).unwrap();
        assert_eq!(heater.mode, None);
        assert_eq!(heater.heating, HeatingState::Heat);
        assert_eq!(heater.target_heating, HeatingState::Heat);
        assert_eq!(changed, StateChange::HEATING);

        // a known OFF afterwards still stops heating
        heater.apply_word(HeaterCommand::SetMode(HeaterMode::Off).encode().unwrap()).unwrap();
        assert_eq!(heater.mode, Some(HeaterMode::Off));
        assert_eq!(heater.heating, HeatingState::Off);

        // unknown id from a known mode clears the mode
        let changed = heater.apply_word(63).unwrap();
        assert_eq!(heater.mode, None);
        assert_eq!(heater.heating, HeatingState::Heat);
        assert!(changed.contains(StateChange::MODE | StateChange::HEATING));
    }

    #[test]
    fn test_heating_from_mode_id() {
        assert_eq!(HeatingState::from_mode_id(4), HeatingState::Off);
        for id in [0, 1, 2, 3, 5, 6, 42, 63] {
            assert_eq!(HeatingState::from_mode_id(id), HeatingState::Heat);
        }
    }

    #[test]
    fn test_display_unit() {
        let mut heater = HeaterState::default();
        assert!(heater.set_display_unit(DisplayUnit::Celsius).is_empty());
        assert_eq!(heater.set_display_unit(DisplayUnit::Fahrenheit), StateChange::DISPLAY_UNIT);
    }
}
