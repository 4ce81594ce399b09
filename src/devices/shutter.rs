// MIT License - Copyright (c) 2026 Peter Wright
// Shutter (blind/roller) outputs

use std::cmp::Ordering;

use serde::Serialize;

use super::StateChange;

/// Direction a shutter is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    #[default]
    Stopped,
    Increasing,
    Decreasing,
}

impl Movement {
    /// Movement implied by a position report.
    pub fn between(level: u8, target: u8) -> Self {
        match target.cmp(&level) {
            Ordering::Greater => Self::Increasing,
            Ordering::Less => Self::Decreasing,
            Ordering::Equal => Self::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutterState {
    pub level: u8,
    pub target: u8,
    pub movement: Movement,
}

impl Default for ShutterState {
    fn default() -> Self {
        Self {
            level: 100,
            target: 100,
            movement: Movement::Stopped,
        }
    }
}

impl ShutterState {
    /// Apply a position report and derive the movement from it.
    pub fn apply_position(&mut self, level: u8, target: u8) -> StateChange {
        let mut changed = StateChange::empty();
        if self.level != level {
            self.level = level;
            changed |= StateChange::LEVEL;
        }
        if self.target != target {
            self.target = target;
            changed |= StateChange::TARGET;
        }
        let movement = Movement::between(level, target);
        if self.movement != movement {
            self.movement = movement;
            changed |= StateChange::MOVEMENT;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = ShutterState::default();
        assert_eq!((s.level, s.target, s.movement), (100, 100, Movement::Stopped));
    }

    #[test]
    fn test_movement_from_position() {
        let mut s = ShutterState::default();
        let changed = s.apply_position(20, 80);
        assert_eq!(s.movement, Movement::Increasing);
        assert!(changed.contains(StateChange::LEVEL | StateChange::TARGET | StateChange::MOVEMENT));

        s.apply_position(80, 10);
        assert_eq!(s.movement, Movement::Decreasing);

        let changed = s.apply_position(10, 10);
        assert_eq!(s.movement, Movement::Stopped);
        assert_eq!(changed, StateChange::LEVEL | StateChange::MOVEMENT);
    }

    #[test]
    fn test_repeated_position_is_no_change() {
        let mut s = ShutterState::default();
        s.apply_position(40, 60);
        assert!(s.apply_position(40, 60).is_empty());
    }
}
