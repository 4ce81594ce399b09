// MIT License - Copyright (c) 2026 Peter Wright
// Device, group and scene registry with update rules

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{Address, check_level};
use crate::constants::DeviceKind;
use crate::devices::{Device, DeviceState, DisplayUnit, Scene, StateChange};
use crate::error::{DoozError, Result};
use crate::event::{EventSender, HubEvent};
use crate::groups::{Group, GroupKind, GroupState, aggregate_lights, aggregate_shutters};
use crate::protocol::{DeviceDescriptor, GroupDescriptor, SceneDescriptor, StateReport};

/// Index of a device in its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) usize);

/// Index of a group in its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupHandle(pub(crate) usize);

/// Owns every device, group and scene known for the current connection.
///
/// All mutation goes through here so that each effective change emits one
/// `DeviceChanged` followed by one `GroupChanged` per group containing the
/// device. Updates that change nothing emit nothing.
pub struct DeviceStore {
    devices: Vec<Device>,
    groups: Vec<Group>,
    scenes: Vec<Scene>,
    device_index: HashMap<Address, DeviceHandle>,
    group_index: HashMap<Address, GroupHandle>,
    event_tx: EventSender,
}

/// Serializable view of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub kind: DeviceKind,
    pub state: DeviceState,
}

/// Serializable view of one group with its aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub address: Address,
    pub name: String,
    pub room: Option<String>,
    pub kind: GroupKind,
    pub members: Vec<Address>,
    pub state: Option<GroupState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub devices: Vec<DeviceSnapshot>,
    pub groups: Vec<GroupSnapshot>,
    pub scenes: Vec<Scene>,
}

impl DeviceStore {
    pub fn new(event_tx: EventSender) -> Self {
        Self {
            devices: Vec::new(),
            groups: Vec::new(),
            scenes: Vec::new(),
            device_index: HashMap::new(),
            group_index: HashMap::new(),
            event_tx,
        }
    }

    // --- Registration ---

    /// Register a discovered device. An address seen again keeps its state
    /// unless its kind changed.
    pub fn register_device(&mut self, desc: &DeviceDescriptor) -> DeviceHandle {
        if let Some(&handle) = self.device_index.get(&desc.address) {
            let device = &mut self.devices[handle.0];
            device.name = desc.name.clone();
            device.room = desc.room.clone();
            device.mac = desc.mac.clone();
            if device.kind != desc.kind {
                device.kind = desc.kind;
                device.state = DeviceState::for_kind(desc.kind);
            }
            return handle;
        }

        let mut device = Device::new(desc.address, desc.name.clone(), desc.kind);
        device.room = desc.room.clone();
        device.mac = desc.mac.clone();
        debug!(
            "Registered {} {} ({})",
            desc.kind.description(),
            desc.address,
            device.display_name()
        );

        let handle = DeviceHandle(self.devices.len());
        self.devices.push(device);
        self.device_index.insert(desc.address, handle);
        handle
    }

    /// Register a group and join its members. Members that are unknown or of
    /// the wrong kind are skipped with a warning.
    pub fn register_group(&mut self, desc: &GroupDescriptor) -> GroupHandle {
        let handle = match self.group_index.get(&desc.address) {
            Some(&handle) => {
                let group = &mut self.groups[handle.0];
                group.name = desc.name.clone();
                group.room = desc.room.clone();
                handle
            }
            None => {
                let mut group = Group::new(desc.address, desc.name.clone(), desc.kind);
                group.room = desc.room.clone();
                let handle = GroupHandle(self.groups.len());
                self.groups.push(group);
                self.group_index.insert(desc.address, handle);
                handle
            }
        };

        for member in &desc.members {
            if let Err(e) = self.join_group(desc.address, *member) {
                warn!("Group {}: not adding member {}: {}", desc.address, member, e);
            }
        }
        handle
    }

    /// Add a device to a group. Returns false if it was already a member.
    pub fn join_group(&mut self, group: Address, device: Address) -> Result<bool> {
        let g = self.group_handle(group)?;
        let d = self.device_handle(device)?;

        let kind = self.devices[d.0].kind;
        if !self.groups[g.0].kind.accepts(kind) {
            return Err(DoozError::KindMismatch {
                address: device.to_string(),
                kind: kind.description(),
                operation: "group membership",
            });
        }

        if !self.groups[g.0].add_member(d) {
            return Ok(false);
        }
        let backrefs = &mut self.devices[d.0].groups;
        if !backrefs.contains(&g) {
            backrefs.push(g);
        }
        Ok(true)
    }

    pub fn register_scene(&mut self, desc: &SceneDescriptor) {
        match self.scenes.iter_mut().find(|s| s.id == desc.id) {
            Some(scene) => {
                scene.name = desc.name.clone();
                scene.address = desc.address;
            }
            None => self
                .scenes
                .push(Scene::new(desc.id, desc.name.clone(), desc.address)),
        }
    }

    /// Drop every record. Used before a full rediscovery.
    pub fn clear(&mut self) {
        self.devices.clear();
        self.groups.clear();
        self.scenes.clear();
        self.device_index.clear();
        self.group_index.clear();
    }

    // --- Updates ---

    /// Apply a plain level report.
    ///
    /// Lights take it as level/on/brightness. Shutters treat it as a position
    /// report whose target equals the level.
    pub fn apply_level_update(&mut self, address: Address, level: u32) -> Result<StateChange> {
        let level = check_level(level)?;
        self.update_device(address, "level update", |state| match state {
            DeviceState::Light(light) => Some(Ok(light.apply_level(level))),
            DeviceState::Shutter(shutter) => Some(Ok(shutter.apply_position(level, level))),
            DeviceState::Heater(_) => None,
        })
    }

    /// Apply a shutter position report.
    pub fn apply_position_update(
        &mut self,
        address: Address,
        level: u32,
        target: u32,
    ) -> Result<StateChange> {
        let level = check_level(level)?;
        let target = check_level(target)?;
        self.update_device(address, "position update", |state| match state {
            DeviceState::Shutter(shutter) => Some(Ok(shutter.apply_position(level, target))),
            _ => None,
        })
    }

    /// Apply a raw heater word (status report, command echo or relay sentinel).
    pub fn apply_heater_word(&mut self, address: Address, raw: u16) -> Result<StateChange> {
        self.update_device(address, "heater word", |state| match state {
            DeviceState::Heater(heater) => Some(heater.apply_word(raw)),
            _ => None,
        })
    }

    /// Dispatch a decoded state report to the matching rule.
    ///
    /// A position report for a light only carries its level.
    pub fn apply_report(&mut self, address: Address, report: StateReport) -> Result<StateChange> {
        match report {
            StateReport::Raw { raw } => self.apply_heater_word(address, raw),
            StateReport::Position { level, target } => {
                if self.device(address).map(|d| d.kind) == Some(DeviceKind::Shutter) {
                    self.apply_position_update(address, level, target)
                } else {
                    self.apply_level_update(address, level)
                }
            }
            StateReport::Level { level } => self.apply_level_update(address, level),
        }
    }

    /// Confirmed on/off switch of a light.
    pub fn apply_switch(&mut self, address: Address, on: bool) -> Result<StateChange> {
        self.update_device(address, "on/off", |state| match state {
            DeviceState::Light(light) => Some(Ok(light.apply_switch(on))),
            _ => None,
        })
    }

    /// Display unit is accessory-side only; it is never sent to the hub.
    pub fn set_display_unit(&mut self, address: Address, unit: DisplayUnit) -> Result<StateChange> {
        self.update_device(address, "display unit", |state| match state {
            DeviceState::Heater(heater) => Some(Ok(heater.set_display_unit(unit))),
            _ => None,
        })
    }

    /// Raise or drop a scene's momentary flag. Returns true if it changed.
    pub fn set_scene_active(&mut self, id: u32, active: bool) -> Result<bool> {
        let scene = self
            .scenes
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DoozError::UnknownScene { id })?;
        let changed = scene.set_active(active);
        if changed {
            let _ = self.event_tx.send(HubEvent::SceneChanged { id, active });
        }
        Ok(changed)
    }

    fn update_device(
        &mut self,
        address: Address,
        operation: &'static str,
        apply: impl FnOnce(&mut DeviceState) -> Option<Result<StateChange>>,
    ) -> Result<StateChange> {
        let handle = self.device_handle(address)?;
        let device = &mut self.devices[handle.0];
        let old_state = device.state;
        let Some(outcome) = apply(&mut device.state) else {
            return Err(kind_mismatch(device, operation));
        };
        let changed = outcome?;
        self.finish_update(handle, old_state, changed);
        Ok(changed)
    }

    fn finish_update(&mut self, handle: DeviceHandle, old_state: DeviceState, changed: StateChange) {
        if changed.is_empty() {
            return;
        }
        let device = &self.devices[handle.0];
        debug!("Device {} changed: {:?}", device.address, changed.names());
        let _ = self.event_tx.send(HubEvent::DeviceChanged {
            address: device.address,
            old_state,
            new_state: device.state,
            changed,
        });

        if !changed.affects_groups() {
            return;
        }
        for group in &device.groups {
            let group = &self.groups[group.0];
            let _ = self.event_tx.send(HubEvent::GroupChanged {
                address: group.address,
                state: self.aggregate(group),
            });
        }
    }

    // --- Reads ---

    fn device_handle(&self, address: Address) -> Result<DeviceHandle> {
        self.device_index
            .get(&address)
            .copied()
            .ok_or_else(|| DoozError::UnknownDevice {
                address: address.to_string(),
            })
    }

    fn group_handle(&self, address: Address) -> Result<GroupHandle> {
        self.group_index
            .get(&address)
            .copied()
            .ok_or_else(|| DoozError::UnknownGroup {
                address: address.to_string(),
            })
    }

    fn aggregate(&self, group: &Group) -> Option<GroupState> {
        let members = group.members.iter().map(|h| &self.devices[h.0].state);
        match group.kind {
            GroupKind::Light => {
                aggregate_lights(members.filter_map(DeviceState::as_light)).map(GroupState::Light)
            }
            GroupKind::Shutter => {
                aggregate_shutters(members.filter_map(DeviceState::as_shutter))
                    .map(GroupState::Shutter)
            }
        }
    }

    /// Aggregate of a group, computed from current member state.
    pub fn group_state(&self, address: Address) -> Result<Option<GroupState>> {
        let handle = self.group_handle(address)?;
        Ok(self.aggregate(&self.groups[handle.0]))
    }

    pub fn device(&self, address: Address) -> Option<&Device> {
        self.device_index.get(&address).map(|h| &self.devices[h.0])
    }

    pub fn group(&self, address: Address) -> Option<&Group> {
        self.group_index.get(&address).map(|h| &self.groups[h.0])
    }

    pub fn scene(&self, id: u32) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Addresses of the members of a group.
    pub fn members(&self, group: &Group) -> Vec<Address> {
        group
            .members
            .iter()
            .map(|h| self.devices[h.0].address)
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            devices: self
                .devices
                .iter()
                .map(|d| DeviceSnapshot {
                    address: d.address,
                    name: d.name.clone(),
                    room: d.room.clone(),
                    kind: d.kind,
                    state: d.state,
                })
                .collect(),
            groups: self
                .groups
                .iter()
                .map(|g| GroupSnapshot {
                    address: g.address,
                    name: g.name.clone(),
                    room: g.room.clone(),
                    kind: g.kind,
                    members: self.members(g),
                    state: self.aggregate(g),
                })
                .collect(),
            scenes: self.scenes.clone(),
        }
    }
}

fn kind_mismatch(device: &Device, operation: &'static str) -> DoozError {
    DoozError::KindMismatch {
        address: device.address.to_string(),
        kind: device.kind.description(),
        operation,
    }
}
