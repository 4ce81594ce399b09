// MIT License - Copyright (c) 2026 Peter Wright
// Hub connection settings

use crate::constants::{DEFAULT_HUB_PORT, SCENE_PULSE_MS};

/// Configuration for connecting to a hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub host name or IP address
    pub host: String,
    /// Hub JSON-RPC port (default: 55055)
    pub port: u16,
    /// Account login sent with `authenticate`
    pub login: String,
    /// Account password sent with `authenticate`
    pub password: String,
    /// Whether to run discovery after authenticating
    pub auto_discover: bool,
    /// Whether to ask the hub for groups during discovery
    pub discover_groups: bool,
    /// Whether to ask the hub for scenes during discovery
    pub discover_scenes: bool,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-request timeout in milliseconds (0 = wait until disconnect)
    pub request_timeout_ms: u64,
    /// Base delay for exponential backoff between initial connect attempts
    pub reconnect_delay_ms: u64,
    /// Maximum number of connection retries on transient errors (0 = no retries)
    pub max_connect_retries: u32,
    /// Interval of the background check that re-establishes a lost connection
    pub reconnect_interval_ms: u64,
    /// How long a triggered scene reports itself active
    pub scene_pulse_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.50".to_string(),
            port: DEFAULT_HUB_PORT,
            login: String::new(),
            password: String::new(),
            auto_discover: true,
            discover_groups: true,
            discover_scenes: true,
            connect_timeout_ms: 5000,
            request_timeout_ms: 10000,
            reconnect_delay_ms: 10000,
            max_connect_retries: 3,
            reconnect_interval_ms: 10000,
            scene_pulse_ms: SCENE_PULSE_MS,
            event_capacity: 256,
        }
    }
}

impl HubConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::default()
    }

    /// `host:port` string for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for HubConfig.
#[derive(Debug, Clone, Default)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.config.login = login.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn auto_discover(mut self, auto_discover: bool) -> Self {
        self.config.auto_discover = auto_discover;
        self
    }

    pub fn discover_groups(mut self, enabled: bool) -> Self {
        self.config.discover_groups = enabled;
        self
    }

    pub fn discover_scenes(mut self, enabled: bool) -> Self {
        self.config.discover_scenes = enabled;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn scene_pulse_ms(mut self, ms: u64) -> Self {
        self.config.scene_pulse_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> HubConfig {
        self.config
    }
}
