// MIT License - Copyright (c) 2026 Peter Wright
// Hub scenarios

use serde::Serialize;

use crate::codec::Address;

/// A scenario configured on the hub.
///
/// `active` is a momentary flag: it is raised when the scene is triggered
/// and dropped again after the pulse duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scene {
    pub id: u32,
    pub name: String,
    pub address: Option<Address>,
    pub active: bool,
}

impl Scene {
    pub fn new(id: u32, name: impl Into<String>, address: Option<Address>) -> Self {
        Self {
            id,
            name: name.into(),
            address,
            active: false,
        }
    }

    /// Set the active flag. Returns true if it changed.
    pub fn set_active(&mut self, active: bool) -> bool {
        let changed = self.active != active;
        self.active = active;
        changed
    }
}
