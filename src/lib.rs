// MIT License - Copyright (c) 2026 Peter Wright
// Local JSON-RPC bridge to Dooz Oopla mesh hubs
//
//! # dooz-lan-bridge
//!
//! Direct TCP communication with a Dooz Oopla hub on the local network.
//!
//! The hub speaks a streaming JSON-RPC 2.0 dialect with no delimiters
//! between messages. This library frames that stream, correlates answers
//! with requests, keeps a store of the discovered mesh outputs (lights,
//! shutters, pilot-wire heaters), groups and scenes, and broadcasts state
//! changes as they are reported.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dooz_lan_bridge::{Address, DoozHub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HubConfig::builder()
//!         .host("192.168.0.50")
//!         .login("me@example.com")
//!         .password("secret")
//!         .build();
//!
//!     let mut hub = DoozHub::connect(config).await?;
//!
//!     let mut events = hub.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     hub.set_brightness(Address::parse("0002")?, 60).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     hub.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod comm;
pub mod config;
pub mod constants;
pub mod devices;
pub mod error;
pub mod event;
pub mod groups;
pub mod hub;
pub mod protocol;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use codec::{Address, HeaterCommand, HeaterWord, RawWord};
pub use config::{HubConfig, HubConfigBuilder};
pub use constants::{DeviceKind, HeaterMode};
pub use devices::{
    Device, DeviceState, DisplayUnit, HeaterState, HeatingState, LightState, Movement,
    RelayState, Scene, ShutterState, StateChange,
};
pub use error::{DoozError, Result, RpcErrorObject};
pub use event::{EventReceiver, HubEvent};
pub use groups::{Group, GroupKind, GroupState, LightAggregate, ShutterAggregate};
pub use hub::DoozHub;
pub use store::{DeviceSnapshot, GroupSnapshot, StoreSnapshot};
