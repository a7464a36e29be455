use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use packetfall_core::discovery::{DISCOVERY_PORT, MULTICAST_GROUP, SERVICE_NAME};
use packetfall_core::net::protocol::{DEFAULT_HUB_PORT, MAX_MESSAGE_SIZE};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "packetfall.toml";

/// Top-level hub configuration, loaded from `packetfall.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub listen_addr: String,
    /// Name advertised in discovery announcements.
    pub hub_name: String,
    pub world: WorldConfig,
    pub limits: LimitsConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_HUB_PORT}"),
            hub_name: "PacketFall Hub".to_string(),
            world: WorldConfig::default(),
            limits: LimitsConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Game world constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub tick_rate_hz: u32,
    pub max_bullets: usize,
    pub max_hp: u8,
    pub invulnerability_secs: f64,
    pub bullet_max_age_secs: f64,
    /// Vertical slack above and below the world before a bullet is culled.
    pub out_of_bounds_margin: f32,
    /// Records admitted per `packet_data` batch; larger batches are sampled.
    pub spawn_cap_per_batch: usize,
    /// A capture source counts as active while its last packet is this recent.
    pub source_active_secs: f64,
    pub difficulty: u8,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            tick_rate_hz: 30,
            max_bullets: 500,
            max_hp: 3,
            invulnerability_secs: 2.0,
            bullet_max_age_secs: 10.0,
            out_of_bounds_margin: 50.0,
            spawn_cap_per_batch: 10,
            source_active_secs: 5.0,
            difficulty: 1,
        }
    }
}

impl WorldConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn invulnerability(&self) -> Duration {
        Duration::from_secs_f64(self.invulnerability_secs)
    }

    pub fn bullet_max_age(&self) -> Duration {
        Duration::from_secs_f64(self.bullet_max_age_secs)
    }

    pub fn source_active_window(&self) -> Duration {
        Duration::from_secs_f64(self.source_active_secs)
    }

    /// Spawn point for a new or respawned player.
    pub fn spawn_point(&self) -> (f32, f32) {
        (self.width / 2.0, self.height - 100.0)
    }
}

/// Infrastructure limits (connection caps, queue sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub auth_timeout_secs: f64,
    /// Per-session outbound queue; a full queue drops frames for that session.
    pub outbound_queue: usize,
    pub command_queue: usize,
    /// Sustained post-handshake messages per second from a game client.
    pub ws_rate_limit_per_sec: f64,
    /// Messages a game client may send back to back before the sustained
    /// rate applies.
    pub ws_rate_burst: f64,
    /// Largest inbound WebSocket message or frame, in bytes.
    pub max_message_bytes: usize,
    pub max_chat_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            auth_timeout_secs: 5.0,
            outbound_queue: 256,
            command_queue: 1024,
            ws_rate_limit_per_sec: 120.0,
            ws_rate_burst: 240.0,
            max_message_bytes: MAX_MESSAGE_SIZE,
            max_chat_len: 256,
        }
    }
}

impl LimitsConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.auth_timeout_secs)
    }
}

/// Multicast discovery responder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    pub service_name: String,
    /// Host announced to agents. Detected from the default route when unset.
    pub advertised_host: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_group: MULTICAST_GROUP,
            port: DISCOVERY_PORT,
            service_name: SERVICE_NAME.to_string(),
            advertised_host: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidListenAddr(String),
    NotPositive(&'static str),
    Empty(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidListenAddr(addr) => {
                write!(f, "listen_addr {addr:?} is not a valid socket address")
            },
            Self::NotPositive(field) => write!(f, "{field} must be > 0"),
            Self::Empty(field) => write!(f, "{field} must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl HubConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen_addr.clone()));
        }

        let w = &self.world;
        if !(w.width.is_finite() && w.width > 0.0) {
            return Err(ConfigError::NotPositive("world.width"));
        }
        if !(w.height.is_finite() && w.height > 0.0) {
            return Err(ConfigError::NotPositive("world.height"));
        }
        if w.tick_rate_hz == 0 {
            return Err(ConfigError::NotPositive("world.tick_rate_hz"));
        }
        if w.max_bullets == 0 {
            return Err(ConfigError::NotPositive("world.max_bullets"));
        }
        if w.max_hp == 0 {
            return Err(ConfigError::NotPositive("world.max_hp"));
        }
        if !(w.invulnerability_secs.is_finite() && w.invulnerability_secs > 0.0) {
            return Err(ConfigError::NotPositive("world.invulnerability_secs"));
        }
        if !(w.bullet_max_age_secs.is_finite() && w.bullet_max_age_secs > 0.0) {
            return Err(ConfigError::NotPositive("world.bullet_max_age_secs"));
        }
        if w.spawn_cap_per_batch == 0 {
            return Err(ConfigError::NotPositive("world.spawn_cap_per_batch"));
        }
        if !(w.source_active_secs.is_finite() && w.source_active_secs > 0.0) {
            return Err(ConfigError::NotPositive("world.source_active_secs"));
        }

        let l = &self.limits;
        if l.max_ws_connections == 0 {
            return Err(ConfigError::NotPositive("limits.max_ws_connections"));
        }
        if !(l.auth_timeout_secs.is_finite() && l.auth_timeout_secs > 0.0) {
            return Err(ConfigError::NotPositive("limits.auth_timeout_secs"));
        }
        if l.outbound_queue == 0 {
            return Err(ConfigError::NotPositive("limits.outbound_queue"));
        }
        if l.command_queue == 0 {
            return Err(ConfigError::NotPositive("limits.command_queue"));
        }
        if !(l.ws_rate_limit_per_sec.is_finite() && l.ws_rate_limit_per_sec > 0.0) {
            return Err(ConfigError::NotPositive("limits.ws_rate_limit_per_sec"));
        }
        if !(l.ws_rate_burst.is_finite() && l.ws_rate_burst >= 1.0) {
            return Err(ConfigError::NotPositive("limits.ws_rate_burst"));
        }
        if l.max_message_bytes == 0 {
            return Err(ConfigError::NotPositive("limits.max_message_bytes"));
        }
        if l.max_chat_len == 0 {
            return Err(ConfigError::NotPositive("limits.max_chat_len"));
        }

        if self.discovery.service_name.is_empty() {
            return Err(ConfigError::Empty("discovery.service_name"));
        }
        Ok(())
    }

    /// Load config from `PACKETFALL_CONFIG` or `packetfall.toml` if it
    /// exists, then apply env var overrides.
    pub fn load() -> Self {
        let path = std::env::var("PACKETFALL_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        let mut config = Self::load_file(Path::new(&path));
        config.apply_env_overrides();
        config
    }

    /// Parse a TOML file, falling back to defaults when it is missing or
    /// unparseable.
    pub fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<HubConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to parse config: {e}, using defaults");
                    HubConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                HubConfig::default()
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PACKETFALL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Ok(name) = std::env::var("PACKETFALL_HUB_NAME")
            && !name.is_empty()
        {
            self.hub_name = name;
        }
        if let Ok(host) = std::env::var("PACKETFALL_ADVERTISED_HOST")
            && !host.is_empty()
        {
            self.discovery.advertised_host = Some(host);
        }

        if let Ok(val) = std::env::var("PACKETFALL_TICK_RATE")
            && let Ok(n) = val.parse::<u32>()
        {
            self.world.tick_rate_hz = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_MAX_BULLETS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.world.max_bullets = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_WS_RATE_BURST")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_burst = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_DISCOVERY_PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            self.discovery.port = n;
        }
        if let Ok(val) = std::env::var("PACKETFALL_DISCOVERY_ENABLED")
            && let Ok(b) = val.parse::<bool>()
        {
            self.discovery.enabled = b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8766");
        assert_eq!(cfg.world.width, 800.0);
        assert_eq!(cfg.world.height, 600.0);
        assert_eq!(cfg.world.tick_rate_hz, 30);
        assert_eq!(cfg.world.max_bullets, 500);
        assert_eq!(cfg.world.max_hp, 3);
        assert_eq!(cfg.discovery.port, 9999);
        assert_eq!(cfg.discovery.multicast_group, Ipv4Addr::new(239, 255, 42, 99));
        assert!(cfg.discovery.advertised_host.is_none());
    }

    #[test]
    fn default_config_validates() {
        assert_eq!(HubConfig::default().validate(), Ok(()));
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"
hub_name = "lab hub"
"#;
        let cfg: HubConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.hub_name, "lab hub");
        assert_eq!(cfg.world.max_bullets, 500);
        assert_eq!(cfg.limits.auth_timeout_secs, 5.0);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
listen_addr = "0.0.0.0:9000"

[world]
width = 1024.0
height = 768.0
tick_rate_hz = 60
max_bullets = 1000
invulnerability_secs = 1.5

[limits]
max_ws_connections = 50
outbound_queue = 64
max_chat_len = 128
ws_rate_burst = 10.0
max_message_bytes = 4096

[discovery]
enabled = false
multicast_group = "239.1.2.3"
port = 19999
advertised_host = "10.1.1.1"
"#;
        let cfg: HubConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.world.width, 1024.0);
        assert_eq!(cfg.world.tick_rate_hz, 60);
        assert_eq!(cfg.world.max_bullets, 1000);
        assert_eq!(cfg.world.max_hp, 3);
        assert_eq!(cfg.limits.max_ws_connections, 50);
        assert_eq!(cfg.limits.outbound_queue, 64);
        assert_eq!(cfg.limits.max_chat_len, 128);
        assert_eq!(cfg.limits.ws_rate_burst, 10.0);
        assert_eq!(cfg.limits.ws_rate_limit_per_sec, 120.0);
        assert_eq!(cfg.limits.max_message_bytes, 4096);
        assert!(!cfg.discovery.enabled);
        assert_eq!(cfg.discovery.multicast_group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(cfg.discovery.port, 19999);
        assert_eq!(cfg.discovery.advertised_host.as_deref(), Some("10.1.1.1"));
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = HubConfig {
            listen_addr: "not-an-address".to_string(),
            ..HubConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidListenAddr("not-an-address".to_string()))
        );
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = HubConfig::default();
        cfg.world.tick_rate_hz = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive("world.tick_rate_hz"))
        );

        let mut cfg = HubConfig::default();
        cfg.limits.outbound_queue = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive("limits.outbound_queue"))
        );

        let mut cfg = HubConfig::default();
        cfg.limits.ws_rate_burst = 0.5;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive("limits.ws_rate_burst"))
        );

        let mut cfg = HubConfig::default();
        cfg.limits.max_message_bytes = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive("limits.max_message_bytes"))
        );

        let mut cfg = HubConfig::default();
        cfg.world.width = f32::NAN;
        assert_eq!(cfg.validate(), Err(ConfigError::NotPositive("world.width")));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = HubConfig::load_file(Path::new("/nonexistent/packetfall.toml"));
        assert_eq!(cfg.listen_addr, "0.0.0.0:8766");
    }

    #[test]
    fn derived_durations() {
        let w = WorldConfig::default();
        let tick = w.tick_interval();
        assert!(tick > Duration::from_millis(33) && tick < Duration::from_millis(34));
        assert_eq!(w.invulnerability(), Duration::from_secs(2));
        assert_eq!(w.spawn_point(), (400.0, 500.0));
    }
}
