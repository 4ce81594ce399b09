// MIT License - Copyright (c) 2026 Peter Wright
// Events broadcast to the accessory layer

use crate::codec::Address;
use crate::devices::{DeviceState, StateChange};
use crate::groups::GroupState;

/// All events that can be emitted by the hub.
///
/// Users subscribe via `hub.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<HubEvent>`.
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// Transport to the hub established
    Connected,
    /// Transport lost or closed; pending requests have been failed
    Disconnected,
    /// Hub accepted the credentials
    Authenticated,
    /// Discovery finished and the store has been rebuilt
    DiscoveryComplete {
        devices: usize,
        groups: usize,
        scenes: usize,
    },
    /// A device's state changed
    DeviceChanged {
        address: Address,
        old_state: DeviceState,
        new_state: DeviceState,
        changed: StateChange,
    },
    /// The aggregate of a group was recomputed after a member changed.
    /// `state` is `None` for a group with no members.
    GroupChanged {
        address: Address,
        state: Option<GroupState>,
    },
    /// A scene's momentary flag rose or fell
    SceneChanged { id: u32, active: bool },
    /// Malformed or unattributable data from the hub. The session stays usable.
    ProtocolError { code: i64, message: String },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<HubEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<HubEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
