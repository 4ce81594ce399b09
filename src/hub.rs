// MIT License - Copyright (c) 2026 Peter Wright
// Public hub API: session setup, reconnect supervision and commands

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, sleep};
use tracing::{debug, info, warn};

use crate::codec::{Address, HeaterCommand, check_level};
use crate::comm::{Discovery, HubComm};
use crate::config::HubConfig;
use crate::constants::{DeviceKind, HeaterMode, method};
use crate::devices::{Device, DisplayUnit, Scene, StateChange};
use crate::error::{DoozError, Result};
use crate::event::{EventReceiver, EventSender, HubEvent, event_channel};
use crate::groups::{Group, GroupKind, GroupState};
use crate::protocol::{Notification, NotifyState, Request, SetPayload, StateReport, heater_status};
use crate::store::{DeviceStore, StoreSnapshot};

/// What an address refers to.
#[derive(Debug, Clone, Copy)]
enum Target {
    Device(DeviceKind),
    Group(GroupKind),
}

impl Target {
    fn description(&self) -> &'static str {
        match self {
            Target::Device(kind) => kind.description(),
            Target::Group(kind) => kind.description(),
        }
    }
}

/// State shared with the background tasks.
struct HubInner {
    config: HubConfig,
    comm: RwLock<HubComm>,
    store: Arc<RwLock<DeviceStore>>,
    event_tx: EventSender,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    pulses: Mutex<HashMap<u32, JoinHandle<()>>>,
}

/// The main public API for talking to a hub.
///
/// Commands are confirm-then-apply: local state only changes once the hub
/// has answered, and the answer's own report wins over the commanded value.
///
/// # Example
///
/// ```no_run
/// use dooz_lan_bridge::{Address, DoozHub, HubConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = HubConfig::builder()
///         .host("192.168.0.50")
///         .login("me@example.com")
///         .password("secret")
///         .build();
///
///     let mut hub = DoozHub::connect(config).await?;
///
///     let mut events = hub.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {:?}", event);
///         }
///     });
///
///     for device in hub.devices().await {
///         println!("{} {}", device.address, device.display_name());
///     }
///
///     hub.set_brightness(Address::new(0x0002), 40).await?;
///
///     tokio::signal::ctrl_c().await?;
///     hub.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct DoozHub {
    inner: Arc<HubInner>,
    supervisor_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl DoozHub {
    fn new(config: HubConfig) -> Self {
        let (event_tx, _event_rx) = event_channel(config.event_capacity);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let inner = HubInner {
            comm: RwLock::new(HubComm::new(config.clone(), event_tx.clone())),
            store: Arc::new(RwLock::new(DeviceStore::new(event_tx.clone()))),
            config,
            event_tx,
            dispatcher: Mutex::new(None),
            pulses: Mutex::new(HashMap::new()),
        };
        Self {
            inner: Arc::new(inner),
            supervisor_handle: None,
            shutdown_tx,
        }
    }

    /// Connect, authenticate and discover, then keep the connection alive.
    ///
    /// Retries on transient errors (disconnects, timeouts, I/O errors) with
    /// exponential backoff. The base delay is `reconnect_delay_ms` from the
    /// config and the maximum number of retries is `max_connect_retries`.
    /// Once connected, a background check re-establishes a lost session
    /// every `reconnect_interval_ms`.
    pub async fn connect(config: HubConfig) -> Result<Self> {
        let max_retries = config.max_connect_retries;
        let base_delay_ms = config.reconnect_delay_ms;

        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1 << (attempt - 1).min(4));
                warn!(
                    "Connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match Self::try_connect(config.clone()).await {
                Ok(hub) => return Ok(hub),
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("Connection error (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(DoozError::Disconnected))
    }

    /// Single connection attempt without retries.
    async fn try_connect(config: HubConfig) -> Result<Self> {
        let mut hub = Self::new(config);
        hub.inner.comm.write().await.connect().await?;
        hub.inner.start_session().await?;
        hub.start_supervisor();
        info!("Hub session ready");
        Ok(hub)
    }

    /// Run a session over an already-open stream.
    ///
    /// There is no reconnect supervision: a closed stream cannot be reopened.
    pub async fn from_stream<S>(config: HubConfig, stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let hub = Self::new(config);
        hub.inner.comm.write().await.attach(stream).await;
        hub.inner.start_session().await?;
        Ok(hub)
    }

    /// Subscribe to hub events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.event_tx.subscribe()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.comm.read().await.is_connected().await
    }

    /// Start the background check that reconnects a dropped session.
    fn start_supervisor(&mut self) {
        let inner = self.inner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_millis(inner.config.reconnect_interval_ms.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if inner.comm.read().await.is_connected().await {
                            continue;
                        }
                        info!("Hub connection lost, reconnecting");
                        match inner.reconnect().await {
                            Ok(()) => info!("Hub session re-established"),
                            Err(e) => warn!("Reconnect failed: {}", e),
                        }
                    }
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow() {
                            debug!("Reconnect supervisor shutting down");
                            break;
                        }
                    }
                }
            }
        });

        self.supervisor_handle = Some(handle);
    }

    // --- Accessors ---

    pub async fn devices(&self) -> Vec<Device> {
        self.inner.store.read().await.devices().to_vec()
    }

    pub async fn device(&self, address: Address) -> Option<Device> {
        self.inner.store.read().await.device(address).cloned()
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.inner.store.read().await.groups().to_vec()
    }

    pub async fn group_state(&self, address: Address) -> Result<Option<GroupState>> {
        self.inner.store.read().await.group_state(address)
    }

    pub async fn scenes(&self) -> Vec<Scene> {
        self.inner.store.read().await.scenes().to_vec()
    }

    pub async fn scene(&self, id: u32) -> Option<Scene> {
        self.inner.store.read().await.scene(id).cloned()
    }

    /// Serializable view of every device, group and scene.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.store.read().await.snapshot()
    }

    /// Discard the store and run discovery again on the current session.
    pub async fn rediscover(&self) -> Result<()> {
        let discovery = self.inner.comm.read().await.discover().await?;
        self.inner.apply_discovery(discovery).await;
        Ok(())
    }

    // --- Commands ---

    async fn send(&self, request: Request) -> Result<Value> {
        self.inner.comm.read().await.send(&request).await
    }

    async fn target(&self, address: Address) -> Result<Target> {
        let store = self.inner.store.read().await;
        if let Some(device) = store.device(address) {
            return Ok(Target::Device(device.kind));
        }
        if let Some(group) = store.group(address) {
            return Ok(Target::Group(group.kind));
        }
        Err(DoozError::UnknownDevice {
            address: address.to_string(),
        })
    }

    /// Apply the report carried by a `set` answer, or the commanded change
    /// when the answer carries none.
    async fn confirm(
        &self,
        address: Address,
        result: &Value,
        commanded: impl FnOnce(&mut DeviceStore) -> Result<StateChange>,
    ) -> Result<StateChange> {
        let mut store = self.inner.store.write().await;
        match StateReport::decode(result) {
            Ok(report) => store.apply_report(address, report),
            Err(_) => commanded(&mut store),
        }
    }

    /// Send a heater command word and apply the confirmed state.
    async fn heater_command(&self, address: Address, command: HeaterCommand) -> Result<StateChange> {
        let word = command.encode()?;
        debug!("Heater {} <- {:?} ({:04X})", address, command, word);
        let result = self
            .send(Request::Set {
                address,
                payload: SetPayload::Raw(word),
            })
            .await?;

        let mut store = self.inner.store.write().await;
        match (heater_status(&result), command) {
            (Some(status), _) => store.apply_heater_word(address, status),
            (None, HeaterCommand::QueryStatus) => {
                debug!("Heater {} answered without a status word", address);
                Ok(StateChange::empty())
            }
            (None, _) => store.apply_heater_word(address, word),
        }
    }

    /// Switch a light, a light group or a heater.
    ///
    /// Heaters map on to PRESENT and off to OFF. Group commands go to the
    /// group address; the members' notifications update the store.
    pub async fn set_on(&self, address: Address, on: bool) -> Result<StateChange> {
        let payload = SetPayload::Switch(on);
        match self.target(address).await? {
            Target::Device(kind) if kind.is_light() => {
                let result = self.send(Request::Set { address, payload }).await?;
                self.confirm(address, &result, |store| store.apply_switch(address, on))
                    .await
            }
            Target::Device(DeviceKind::Heater) => {
                let mode = if on { HeaterMode::Present } else { HeaterMode::Off };
                self.heater_command(address, HeaterCommand::SetMode(mode)).await
            }
            Target::Group(GroupKind::Light) => {
                self.send(Request::Set { address, payload }).await?;
                Ok(StateChange::empty())
            }
            target => Err(unsupported(address, target, "on/off")),
        }
    }

    /// Set the dimmer level of a light or light group.
    pub async fn set_brightness(&self, address: Address, level: u32) -> Result<StateChange> {
        let level = check_level(level)?;
        let payload = SetPayload::Level(level);
        match self.target(address).await? {
            Target::Device(kind) if kind.is_light() => {
                let result = self.send(Request::Set { address, payload }).await?;
                self.confirm(address, &result, |store| {
                    store.apply_level_update(address, u32::from(level))
                })
                .await
            }
            Target::Group(GroupKind::Light) => {
                self.send(Request::Set { address, payload }).await?;
                Ok(StateChange::empty())
            }
            target => Err(unsupported(address, target, "brightness")),
        }
    }

    /// Move a shutter or shutter group towards `target` percent.
    ///
    /// The hub answers with the accepted target; the current level is left
    /// for the following position notifications.
    pub async fn set_target_position(&self, address: Address, target: u32) -> Result<StateChange> {
        let target = check_level(target)?;
        let payload = SetPayload::Level(target);
        match self.target(address).await? {
            Target::Device(DeviceKind::Shutter) => {
                let result = self.send(Request::Set { address, payload }).await?;
                let accepted = result
                    .get("level")
                    .and_then(Value::as_u64)
                    .and_then(|l| u32::try_from(l).ok())
                    .unwrap_or(u32::from(target));

                let mut store = self.inner.store.write().await;
                let level = store
                    .device(address)
                    .and_then(|d| d.state.as_shutter())
                    .map(|s| u32::from(s.level))
                    .unwrap_or(accepted);
                store.apply_position_update(address, level, accepted)
            }
            Target::Group(GroupKind::Shutter) => {
                self.send(Request::Set { address, payload }).await?;
                Ok(StateChange::empty())
            }
            target => Err(unsupported(address, target, "target position")),
        }
    }

    pub async fn set_heater_mode(&self, address: Address, mode: HeaterMode) -> Result<StateChange> {
        self.require_heater(address, "heater mode").await?;
        self.heater_command(address, HeaterCommand::SetMode(mode)).await
    }

    /// Override a heater's setpoint (10 to 38 °C, rounded to 0.5°).
    pub async fn set_heater_temperature(&self, address: Address, celsius: f32) -> Result<StateChange> {
        self.require_heater(address, "target temperature").await?;
        self.heater_command(address, HeaterCommand::SetOverride(celsius))
            .await
    }

    /// Change how a heater's temperatures are presented. Nothing is sent.
    pub async fn set_display_unit(&self, address: Address, unit: DisplayUnit) -> Result<StateChange> {
        self.inner.store.write().await.set_display_unit(address, unit)
    }

    async fn require_heater(&self, address: Address, operation: &'static str) -> Result<()> {
        match self.target(address).await? {
            Target::Device(DeviceKind::Heater) => Ok(()),
            target => Err(unsupported(address, target, operation)),
        }
    }

    /// Ask the hub for a device's current state and apply it.
    ///
    /// Heaters have no `get`; they are asked for a status word instead.
    pub async fn refresh(&self, address: Address) -> Result<StateChange> {
        match self.target(address).await? {
            Target::Device(DeviceKind::Heater) => {
                self.heater_command(address, HeaterCommand::QueryStatus).await
            }
            Target::Device(_) => {
                let result = self.send(Request::Get { address }).await?;
                let report = StateReport::decode(&result)?;
                self.inner.store.write().await.apply_report(address, report)
            }
            target => Err(unsupported(address, target, "refresh")),
        }
    }

    /// Start a scenario and pulse its `active` flag for `scene_pulse_ms`.
    ///
    /// Triggering again while active restarts the pulse.
    pub async fn trigger_scene(&self, id: u32) -> Result<()> {
        if self.inner.store.read().await.scene(id).is_none() {
            return Err(DoozError::UnknownScene { id });
        }
        let result = self.send(Request::StartScenario { scenario_id: id }).await?;
        debug!("Scenario {} started: {}", id, result);

        self.inner.store.write().await.set_scene_active(id, true)?;

        let store = self.inner.store.clone();
        let pulse = Duration::from_millis(self.inner.config.scene_pulse_ms);
        let handle = tokio::spawn(async move {
            sleep(pulse).await;
            if let Err(e) = store.write().await.set_scene_active(id, false) {
                debug!("Scene {} pulse ended after rediscovery: {}", id, e);
            }
        });
        if let Some(previous) = self.inner.pulses.lock().await.insert(id, handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Disconnect from the hub and stop background tasks.
    ///
    /// Device state is kept; a new connection rebuilds it.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from hub");
        self.shutdown_tx.send_replace(true);

        if let Some(h) = self.supervisor_handle.take() {
            h.abort();
        }
        if let Some(h) = self.inner.dispatcher.lock().await.take() {
            h.abort();
        }

        self.inner.comm.write().await.disconnect().await
    }
}

impl Drop for DoozHub {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(h) = self.supervisor_handle.take() {
            h.abort();
        }
        if let Ok(mut dispatcher) = self.inner.dispatcher.try_lock() {
            if let Some(h) = dispatcher.take() {
                h.abort();
            }
        }
    }
}

impl HubInner {
    /// Authenticate and discover on a freshly opened transport.
    ///
    /// The notification handler is registered first so that nothing pushed
    /// during discovery is lost.
    async fn start_session(&self) -> Result<()> {
        let comm = self.comm.read().await;
        let notifications = comm.session()?.on_notification(method::NOTIFY_STATE).await;
        self.spawn_dispatcher(notifications).await;

        comm.authenticate().await?;
        if self.config.auto_discover {
            let discovery = comm.discover().await?;
            drop(comm);
            self.apply_discovery(discovery).await;
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.comm.write().await.connect().await?;
        if let Err(e) = self.start_session().await {
            // A half-set-up socket still reads as connected and would stop the retries
            if let Err(close_err) = self.comm.write().await.disconnect().await {
                debug!("Closing after failed session setup: {}", close_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Route `notify_state` pushes into the store.
    async fn spawn_dispatcher(&self, mut notifications: mpsc::UnboundedReceiver<Notification>) {
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let update = match NotifyState::decode(&notification.params) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Ignoring notify_state: {}", e);
                        continue;
                    }
                };
                let outcome = store.write().await.apply_report(update.address, update.report);
                match outcome {
                    Ok(_) => {}
                    Err(DoozError::UnknownDevice { address }) => {
                        debug!("notify_state for unknown address {}", address)
                    }
                    Err(e) => warn!("Failed to apply notify_state for {}: {}", update.address, e),
                }
            }
            debug!("Notification dispatcher stopped");
        });

        if let Some(previous) = self.dispatcher.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Rebuild the store from a discovery pass.
    async fn apply_discovery(&self, discovery: Discovery) {
        let mut store = self.store.write().await;
        store.clear();
        for device in &discovery.devices {
            store.register_device(device);
        }
        for group in &discovery.groups {
            store.register_group(group);
        }
        for scene in &discovery.scenes {
            store.register_scene(scene);
        }
        let (devices, groups, scenes) = (
            store.devices().len(),
            store.groups().len(),
            store.scenes().len(),
        );
        drop(store);

        info!(
            "Discovery complete: {} devices, {} groups, {} scenes",
            devices, groups, scenes
        );
        let _ = self.event_tx.send(HubEvent::DiscoveryComplete {
            devices,
            groups,
            scenes,
        });
    }
}

fn unsupported(address: Address, target: Target, operation: &'static str) -> DoozError {
    DoozError::KindMismatch {
        address: address.to_string(),
        kind: target.description(),
        operation,
    }
}
