// MIT License - Copyright (c) 2026 Peter Wright
// dooz2mqtt: publishes hub state to MQTT and applies commands received from it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

use dooz_lan_bridge::{
    Address, DeviceState, DisplayUnit, DoozHub, EventReceiver, GroupState, HeaterMode, HubConfig,
    HubEvent, RelayState, StateChange, StoreSnapshot,
};

const DEFAULT_MQTT_PORT: u16 = 1883;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "dooz2mqtt", version)]
#[command(about = "Publish a Dooz Oopla hub to MQTT")]
struct Cli {
    /// TOML file with [hub], [mqtt] and optional [names] sections
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    hub: HubSection,
    mqtt: MqttSection,
    #[serde(default, deserialize_with = "address_keys")]
    names: HashMap<Address, String>,
}

/// Unset values fall back to the library defaults.
#[derive(Debug, Deserialize)]
struct HubSection {
    host: String,
    port: Option<u16>,
    login: String,
    password: String,
    discover_groups: Option<bool>,
    discover_scenes: Option<bool>,
    request_timeout_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    reconnect_interval_ms: Option<u64>,
    max_connect_retries: Option<u32>,
    scene_pulse_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MqttSection {
    url: String,
    client_id: Option<String>,
    subscribe_topic: Option<String>,
    publish_topic: Option<String>,
    snapshot_interval_secs: Option<u64>,
}

/// `[names]` is keyed by hex address strings.
fn address_keys<'de, D>(deserializer: D) -> Result<HashMap<Address, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    HashMap::<String, String>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, name)| {
            key.parse::<Address>()
                .map(|address| (address, name))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl HubSection {
    fn hub_config(&self) -> HubConfig {
        let defaults = HubConfig::default();
        HubConfig::builder()
            .host(&self.host)
            .port(self.port.unwrap_or(defaults.port))
            .login(&self.login)
            .password(&self.password)
            .discover_groups(self.discover_groups.unwrap_or(defaults.discover_groups))
            .discover_scenes(self.discover_scenes.unwrap_or(defaults.discover_scenes))
            .request_timeout_ms(self.request_timeout_ms.unwrap_or(defaults.request_timeout_ms))
            .reconnect_delay_ms(self.reconnect_delay_ms.unwrap_or(defaults.reconnect_delay_ms))
            .reconnect_interval_ms(
                self.reconnect_interval_ms
                    .unwrap_or(defaults.reconnect_interval_ms),
            )
            .max_connect_retries(self.max_connect_retries.unwrap_or(defaults.max_connect_retries))
            .scene_pulse_ms(self.scene_pulse_ms.unwrap_or(defaults.scene_pulse_ms))
            .build()
    }
}

/// Everything one bridge session needs, resolved from the config file.
#[derive(Debug, Clone)]
struct Settings {
    hub: HubConfig,
    broker_host: String,
    broker_port: u16,
    client_id: String,
    command_topic: String,
    state_topic: String,
    snapshot_every: Duration,
    names: Arc<HashMap<Address, String>>,
}

impl Settings {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    fn parse(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        let (broker_host, broker_port) = broker_address(&file.mqtt.url)?;
        let mqtt = file.mqtt;
        Ok(Self {
            hub: file.hub.hub_config(),
            broker_host,
            broker_port,
            client_id: mqtt.client_id.unwrap_or_else(|| "dooz-bridge".to_string()),
            command_topic: mqtt
                .subscribe_topic
                .unwrap_or_else(|| "dooz/cmd".to_string()),
            state_topic: mqtt.publish_topic.unwrap_or_else(|| "dooz".to_string()),
            snapshot_every: Duration::from_secs(mqtt.snapshot_interval_secs.unwrap_or(60).max(1)),
            names: Arc::new(file.names),
        })
    }
}

/// Split a broker URL (`mqtt://host:port`, `tcp://host:port` or bare
/// `host[:port]`) into host and port.
fn broker_address(url: &str) -> Result<(String, u16)> {
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some((scheme, _)) => bail!("Unsupported MQTT URL scheme '{scheme}'"),
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid MQTT port '{port}'"))?;
            Ok((host.to_string(), port))
        }
        None if !rest.is_empty() => Ok((rest.to_string(), DEFAULT_MQTT_PORT)),
        _ => bail!("MQTT URL '{url}' has no host"),
    }
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

/// Every published message is a flat object: `{now, op, ...body}`.
#[derive(Serialize)]
struct Outbound<T: Serialize> {
    now: u64,
    op: &'static str,
    #[serde(flatten)]
    body: T,
}

fn outbound<T: Serialize>(op: &'static str, body: T) -> Outbound<T> {
    Outbound {
        now: Utc::now().timestamp_millis() as u64,
        op,
        body,
    }
}

#[derive(Serialize)]
struct NoBody {}

#[derive(Serialize)]
struct SnapshotBody {
    state: StoreSnapshot,
}

#[derive(Serialize)]
struct DeviceBody {
    address: Address,
    name: String,
    changed: Vec<&'static str>,
    state: DeviceState,
}

#[derive(Serialize)]
struct GroupBody {
    address: Address,
    name: String,
    state: Option<GroupState>,
}

#[derive(Serialize)]
struct SceneBody {
    scene: u32,
    name: String,
    active: bool,
}

#[derive(Serialize)]
struct RelayBody {
    address: Address,
    relay: RelayState,
}

#[derive(Serialize)]
struct ProtocolErrorBody {
    code: i64,
    message: String,
}

#[derive(Serialize)]
struct AckBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

/// A command received on the command topic. Extra fields such as `op_id`
/// only come back through the acknowledgement's `src`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
enum Command {
    Snapshot,
    Ping,
    SetOn { address: Address, on: bool },
    SetLevel { address: Address, level: u32 },
    SetTarget { address: Address, target: u32 },
    SetHeaterMode { address: Address, mode: HeaterMode },
    SetTemperature { address: Address, temperature: f32 },
    SetDisplayUnit { address: Address, unit: DisplayUnit },
    TriggerScene { scene: u32 },
    Refresh { address: Address },
}

/// Configured display name if there is one, else the hub's.
fn display_name(names: &HashMap<Address, String>, address: Address, hub_name: &str) -> String {
    names
        .get(&address)
        .cloned()
        .unwrap_or_else(|| hub_name.to_string())
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

struct Bridge {
    hub: DoozHub,
    client: AsyncClient,
    state_topic: String,
    names: Arc<HashMap<Address, String>>,
}

impl Bridge {
    async fn publish<T: Serialize>(&self, message: &Outbound<T>, retain: bool) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode {} message: {e}", message.op);
                return;
            }
        };
        if let Err(e) = self
            .client
            .publish(&self.state_topic, QoS::AtLeastOnce, retain, payload)
            .await
        {
            error!("Publishing {} to {} failed: {e}", message.op, self.state_topic);
        }
    }

    async fn snapshot(&self) -> Outbound<SnapshotBody> {
        let mut state = self.hub.snapshot().await;
        for device in &mut state.devices {
            device.name = display_name(&self.names, device.address, &device.name);
        }
        for group in &mut state.groups {
            group.name = display_name(&self.names, group.address, &group.name);
        }
        outbound("SNAPSHOT", SnapshotBody { state })
    }

    async fn publish_snapshot(&self) {
        let message = self.snapshot().await;
        self.publish(&message, true).await;
    }

    async fn ack(&self, success: bool, src: Option<Value>, data: Option<Value>) {
        self.publish(&outbound("CMD_ACK", AckBody { success, src, data }), false)
            .await;
    }

    /// Translate one hub event into MQTT messages.
    async fn forward(&self, event: HubEvent) {
        match event {
            HubEvent::DeviceChanged {
                address,
                new_state,
                changed,
                ..
            } => {
                if changed.contains(StateChange::RELAY)
                    && let Some(relay) = new_state.as_heater().and_then(|h| h.relay)
                {
                    info!("Heater {address} relay {relay:?}");
                    self.publish(&outbound("RELAY", RelayBody { address, relay }), false)
                        .await;
                }

                // Relay moves are reported on their own above
                let changed = changed.difference(StateChange::RELAY);
                if changed.is_empty() {
                    return;
                }
                let hub_name = match self.hub.device(address).await {
                    Some(device) => device.display_name(),
                    None => format!("Device {address}"),
                };
                let name = display_name(&self.names, address, &hub_name);
                debug!("{name} ({address}) changed {:?}", changed.names());

                let body = DeviceBody {
                    address,
                    name,
                    changed: changed.names(),
                    state: new_state,
                };
                self.publish(&outbound("DEVICE_STATE", body), false).await;
            }

            HubEvent::GroupChanged { address, state } => {
                let hub_name = self
                    .hub
                    .groups()
                    .await
                    .into_iter()
                    .find(|g| g.address == address)
                    .map(|g| g.name)
                    .unwrap_or_else(|| format!("Group {address}"));
                let body = GroupBody {
                    address,
                    name: display_name(&self.names, address, &hub_name),
                    state,
                };
                self.publish(&outbound("GROUP_STATE", body), false).await;
            }

            HubEvent::SceneChanged { id, active } => {
                let name = match self.hub.scene(id).await {
                    Some(scene) => scene.name,
                    None => format!("Scene {id}"),
                };
                info!("Scene {id} ({name}) active={active}");
                let body = SceneBody {
                    scene: id,
                    name,
                    active,
                };
                self.publish(&outbound("SCENE_STATE", body), false).await;
            }

            HubEvent::ProtocolError { code, message } => {
                warn!("Hub protocol error {code}: {message}");
                let body = ProtocolErrorBody { code, message };
                self.publish(&outbound("PROTOCOL_ERROR", body), false).await;
            }

            HubEvent::Connected => {
                info!("Hub session up");
                self.publish(&outbound("HUB_CONNECTED", NoBody {}), false)
                    .await;
            }

            HubEvent::Disconnected => {
                warn!("Hub session down, waiting for the reconnect check");
                self.publish(&outbound("HUB_DISCONNECTED", NoBody {}), false)
                    .await;
            }

            HubEvent::Authenticated => debug!("Hub accepted credentials"),

            HubEvent::DiscoveryComplete {
                devices,
                groups,
                scenes,
            } => {
                info!("Rediscovered {devices} devices, {groups} groups, {scenes} scenes");
                self.publish_snapshot().await;
            }
        }
    }

    /// Run a command against the hub. `Ok` may carry data for the ack.
    async fn execute(&self, command: &Command) -> dooz_lan_bridge::Result<Option<Value>> {
        let hub = &self.hub;
        let changed = match *command {
            Command::Snapshot => {
                let message = self.snapshot().await;
                self.publish(&message, true).await;
                return Ok(serde_json::to_value(&message).ok());
            }
            Command::Ping => return Ok(None),
            Command::TriggerScene { scene } => {
                hub.trigger_scene(scene).await?;
                return Ok(None);
            }
            Command::SetOn { address, on } => hub.set_on(address, on).await?,
            Command::SetLevel { address, level } => hub.set_brightness(address, level).await?,
            Command::SetTarget { address, target } => {
                hub.set_target_position(address, target).await?
            }
            Command::SetHeaterMode { address, mode } => hub.set_heater_mode(address, mode).await?,
            Command::SetTemperature {
                address,
                temperature,
            } => hub.set_heater_temperature(address, temperature).await?,
            Command::SetDisplayUnit { address, unit } => {
                hub.set_display_unit(address, unit).await?
            }
            Command::Refresh { address } => hub.refresh(address).await?,
        };
        debug!("{command:?} changed {:?}", changed.names());
        Ok(None)
    }

    /// Parse, run and acknowledge one command payload.
    async fn handle_payload(&self, payload: &[u8]) {
        let src: Option<Value> = serde_json::from_slice(payload).ok();
        let command = match src.clone().map(serde_json::from_value::<Command>) {
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                warn!("Rejected MQTT command: {e}");
                self.ack(false, src, None).await;
                return;
            }
            None => {
                warn!(
                    "Ignoring non-JSON MQTT payload: {}",
                    String::from_utf8_lossy(payload)
                );
                return;
            }
        };

        if command == Command::Snapshot {
            debug!("MQTT command {command:?}");
        } else {
            info!("MQTT command {command:?}");
        }

        match self.execute(&command).await {
            Ok(data) => self.ack(true, src, data).await,
            Err(e) => {
                error!("{command:?} failed: {e}");
                self.ack(false, src, None).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn forward_events(bridge: Arc<Bridge>, mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(event) => bridge.forward(event).await,
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {missed} hub events, resynchronising with a snapshot");
                bridge.publish_snapshot().await;
            }
            Err(RecvError::Closed) => {
                debug!("Hub event channel closed");
                break;
            }
        }
    }
}

async fn poll_mqtt(bridge: Arc<Bridge>, mut eventloop: EventLoop, command_topic: String) {
    loop {
        match eventloop.poll().await {
            // Subscriptions do not survive a broker reconnect
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected, subscribing to {command_topic}");
                if let Err(e) = bridge
                    .client
                    .subscribe(&command_topic, QoS::AtLeastOnce)
                    .await
                {
                    error!("Subscribing to {command_topic} failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == command_topic => {
                bridge.handle_payload(&publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn publish_snapshots(bridge: Arc<Bridge>, every: Duration) {
    let mut ticker = interval(every);
    // First tick fires at once; the session already published one
    ticker.tick().await;
    loop {
        ticker.tick().await;
        bridge.publish_snapshot().await;
    }
}

/// One hub connection plus one broker connection.
struct Session {
    bridge: Arc<Bridge>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    async fn start(settings: &Settings) -> Result<Self> {
        info!("Connecting to Dooz hub at {}", settings.hub.socket_addr());
        let hub = DoozHub::connect(settings.hub.clone())
            .await
            .context("Failed to connect to hub")?;
        let events = hub.subscribe();

        let mut options = MqttOptions::new(
            &settings.client_id,
            &settings.broker_host,
            settings.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 256);

        let bridge = Arc::new(Bridge {
            hub,
            client,
            state_topic: settings.state_topic.clone(),
            names: settings.names.clone(),
        });
        bridge.publish_snapshot().await;

        let tasks = vec![
            tokio::spawn(forward_events(bridge.clone(), events)),
            tokio::spawn(poll_mqtt(
                bridge.clone(),
                eventloop,
                settings.command_topic.clone(),
            )),
            tokio::spawn(publish_snapshots(bridge.clone(), settings.snapshot_every)),
        ];
        info!(
            "Bridging to {}:{} on {}",
            settings.broker_host, settings.broker_port, settings.state_topic
        );
        Ok(Self { bridge, tasks })
    }

    async fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }

        match Arc::try_unwrap(self.bridge) {
            Ok(mut bridge) => {
                if let Err(e) = bridge.hub.disconnect().await {
                    warn!("Hub disconnect failed: {e}");
                }
            }
            Err(_) => warn!("Bridge still shared after stopping tasks, hub not closed cleanly"),
        }
    }
}

/// Wait for a signal. Returns true when the bridge should reload and restart.
async fn next_signal(sighup: &mut Signal, sigterm: &mut Signal) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, stopping");
            false
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, stopping");
            false
        }
        _ = sighup.recv() => {
            info!("SIGHUP received, reloading configuration");
            true
        }
    }
}

fn init_tracing() {
    // RUST_LOG overrides, e.g. RUST_LOG=dooz_lan_bridge=trace
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // journald stamps every line itself
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        builder.without_time().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let session = Session::start(&settings).await?;
        let restart = next_signal(&mut sighup, &mut sigterm).await;
        session.stop().await;

        if !restart {
            break;
        }
        match Settings::load(&cli.config) {
            Ok(reloaded) => {
                settings = reloaded;
                info!("Configuration reloaded from {}", cli.config.display());
            }
            Err(e) => warn!("Keeping previous configuration: {e:#}"),
        }
    }

    info!("Stopped");
    Ok(())
}
