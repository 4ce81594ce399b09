// MIT License - Copyright (c) 2026 Peter Wright
// On/off, dimmer, relay and pulse outputs

use serde::Serialize;

use super::StateChange;

/// Default brightness before the first non-zero level is seen.
pub const DEFAULT_BRIGHTNESS: u8 = 100;

/// State of a level-driven light output.
///
/// `on` mirrors `level > 0`. `brightness` tracks `level` while on and keeps
/// its last non-zero value while off, so switching back on restores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightState {
    pub on: bool,
    pub level: u8,
    pub brightness: u8,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            level: 0,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

impl LightState {
    /// Apply a 0-100 level report. Returns the fields that changed.
    pub fn apply_level(&mut self, level: u8) -> StateChange {
        let mut changed = StateChange::empty();

        if self.level != level {
            self.level = level;
            changed |= StateChange::LEVEL;
        }

        let on = level > 0;
        if self.on != on {
            self.on = on;
            changed |= StateChange::ON;
        }

        if on && self.brightness != level {
            self.brightness = level;
            changed |= StateChange::BRIGHTNESS;
        }

        changed
    }

    /// Apply a confirmed on/off switch. Switching on restores the last brightness.
    pub fn apply_switch(&mut self, on: bool) -> StateChange {
        let level = if on { self.brightness.max(1) } else { 0 };
        self.apply_level(level)
    }

    /// Brightness as seen by a group: the level while on, zero while off.
    pub fn effective_brightness(&self) -> u8 {
        if self.on { self.brightness } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_drives_on_and_brightness() {
        let mut light = LightState::default();
        let changed = light.apply_level(40);
        assert_eq!(
            changed,
            StateChange::LEVEL | StateChange::ON | StateChange::BRIGHTNESS
        );
        assert!(light.on);
        assert_eq!(light.brightness, 40);
    }

    #[test]
    fn test_off_keeps_last_brightness() {
        let mut light = LightState::default();
        light.apply_level(70);
        let changed = light.apply_level(0);
        assert_eq!(changed, StateChange::LEVEL | StateChange::ON);
        assert!(!light.on);
        assert_eq!(light.brightness, 70);
        assert_eq!(light.effective_brightness(), 0);
    }

    #[test]
    fn test_identical_level_is_no_change() {
        let mut light = LightState::default();
        light.apply_level(55);
        assert!(light.apply_level(55).is_empty());
    }

    #[test]
    fn test_switch_on_restores_brightness() {
        let mut light = LightState::default();
        light.apply_level(30);
        light.apply_switch(false);
        assert_eq!(light.level, 0);
        light.apply_switch(true);
        assert_eq!(light.level, 30);
        assert!(light.on);
    }

    #[test]
    fn test_default_brightness() {
        let mut light = LightState::default();
        assert_eq!(light.brightness, DEFAULT_BRIGHTNESS);
        light.apply_switch(true);
        assert_eq!(light.level, 100);
    }
}
