// MIT License - Copyright (c) 2026 Peter Wright
// Group records and aggregation of member state

use serde::Serialize;

use crate::codec::Address;
use crate::constants::DeviceKind;
use crate::devices::{LightState, Movement, ShutterState};
use crate::store::DeviceHandle;

/// What a group aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Light,
    Shutter,
}

impl GroupKind {
    /// Group kind for members of the given device kind. Heaters cannot be grouped.
    pub fn for_device_kind(kind: DeviceKind) -> Option<Self> {
        match kind {
            DeviceKind::Shutter => Some(Self::Shutter),
            DeviceKind::Heater => None,
            _ => Some(Self::Light),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Light => "light group",
            Self::Shutter => "shutter group",
        }
    }

    /// Whether a device of `kind` may join a group of this kind.
    pub fn accepts(&self, kind: DeviceKind) -> bool {
        Self::for_device_kind(kind) == Some(*self)
    }
}

/// A virtual device addressing several outputs at once.
///
/// Holds handles only: the aggregate is always computed from member state.
#[derive(Debug, Clone)]
pub struct Group {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub kind: GroupKind,
    pub members: Vec<DeviceHandle>,
}

impl Group {
    pub fn new(address: Address, name: impl Into<String>, kind: GroupKind) -> Self {
        Self {
            address,
            name: name.into(),
            room: None,
            kind,
            members: Vec::new(),
        }
    }

    /// Add a member. Returns false if it was already present.
    pub fn add_member(&mut self, handle: DeviceHandle) -> bool {
        if self.members.contains(&handle) {
            return false;
        }
        self.members.push(handle);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LightAggregate {
    pub on: bool,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutterAggregate {
    pub level: u8,
    pub target: u8,
    pub movement: Movement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupState {
    Light(LightAggregate),
    Shutter(ShutterAggregate),
}

fn rounded_mean(values: impl Iterator<Item = u8>) -> Option<u8> {
    let (sum, count) = values.fold((0u32, 0u32), |(s, c), v| (s + v as u32, c + 1));
    if count == 0 {
        return None;
    }
    Some((sum as f64 / count as f64).round() as u8)
}

/// Aggregate light members: on if any member is on, brightness is the mean of
/// every member's effective brightness (zero for members that are off).
pub fn aggregate_lights<'a>(
    members: impl IntoIterator<Item = &'a LightState> + Clone,
) -> Option<LightAggregate> {
    let brightness = rounded_mean(members.clone().into_iter().map(LightState::effective_brightness))?;
    let on = members.into_iter().any(|m| m.on);
    Some(LightAggregate { on, brightness })
}

/// Aggregate shutter members: mean level and target. The group is stopped
/// unless a member moves, in which case the first moving member's direction wins.
pub fn aggregate_shutters<'a>(
    members: impl IntoIterator<Item = &'a ShutterState> + Clone,
) -> Option<ShutterAggregate> {
    let level = rounded_mean(members.clone().into_iter().map(|m| m.level))?;
    let target = rounded_mean(members.clone().into_iter().map(|m| m.target))?;
    let movement = members
        .into_iter()
        .map(|m| m.movement)
        .find(|m| *m != Movement::Stopped)
        .unwrap_or(Movement::Stopped);
    Some(ShutterAggregate {
        level,
        target,
        movement,
    })
}
