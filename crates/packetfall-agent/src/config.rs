use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use packetfall_core::discovery::{DISCOVERY_PORT, MULTICAST_GROUP, SERVICE_NAME};
use packetfall_core::net::protocol::DEFAULT_HUB_PORT;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "packetfall-agent.toml";

/// Command-line flags. Anything given here wins over file and environment.
#[derive(Parser, Debug, Default)]
#[command(
    name = "packetfall-agent",
    version,
    about = "Stream captured packet metadata to a PacketFall hub"
)]
pub struct Cli {
    /// Hub address (`ws://host:port` or `host:port`). Disables discovery.
    #[arg(long)]
    pub hub: Option<String>,

    /// Source name shown to players
    #[arg(long)]
    pub name: Option<String>,

    /// JSON-lines packet feed; stdin when omitted or `-`
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Skip multicast hub discovery
    #[arg(long)]
    pub no_discover: bool,

    /// Config file (default: packetfall-agent.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Agent configuration, loaded from `packetfall-agent.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Explicit hub URL. When unset the agent tries discovery and then
    /// falls back to the local default.
    pub hub_url: Option<String>,
    pub source_name: String,
    pub source_id: String,
    pub input: Option<PathBuf>,
    pub discover: bool,
    pub pipeline: PipelineConfig,
    pub reconnect: ReconnectConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            source_name: default_source_name(),
            source_id: default_source_id(),
            input: None,
            discover: true,
            pipeline: PipelineConfig::default(),
            reconnect: ReconnectConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Filtering, buffering and batching knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum gap between two forwarded records of the same connection.
    pub rate_limit_ms: u64,
    pub cleanup_interval_ms: u64,
    pub buffer_capacity: usize,
    pub batch_interval_ms: u64,
    /// Buffer depth that triggers a flush before the interval elapses.
    pub batch_threshold: usize,
    pub max_batch: usize,
    pub per_connection_cap: usize,
    pub poll_interval_ms: u64,
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 300,
            cleanup_interval_ms: 5_000,
            buffer_capacity: 200,
            batch_interval_ms: 200,
            batch_threshold: 30,
            max_batch: 15,
            per_connection_cap: 2,
            poll_interval_ms: 50,
            stats_interval_secs: 10,
        }
    }
}

impl PipelineConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    pub service_name: String,
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: MULTICAST_GROUP,
            port: DISCOVERY_PORT,
            service_name: SERVICE_NAME.to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_source_name() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "packetfall".to_string());
    format!("{host}_capture")
}

fn default_source_id() -> String {
    format!("capture_{}", uuid::Uuid::new_v4().simple())
}

/// Hub used when nothing was configured and discovery found nothing.
pub fn fallback_hub_url() -> String {
    format!("ws://127.0.0.1:{DEFAULT_HUB_PORT}")
}

/// Accept `host:port` as shorthand for `ws://host:port`.
pub fn normalize_hub_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        raw.to_string()
    } else {
        format!("ws://{raw}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidHubUrl(String),
    NotPositive(&'static str),
    Empty(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHubUrl(url) => write!(f, "hub_url {url:?} is not a ws:// or wss:// URL"),
            Self::NotPositive(field) => write!(f, "{field} must be > 0"),
            Self::Empty(field) => write!(f, "{field} must not be empty"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.hub_url {
            let host = url
                .strip_prefix("ws://")
                .or_else(|| url.strip_prefix("wss://"))
                .unwrap_or_default();
            if host.is_empty() || host.starts_with('/') {
                return Err(ConfigError::InvalidHubUrl(url.clone()));
            }
        }
        if self.source_id.is_empty() {
            return Err(ConfigError::Empty("source_id"));
        }
        if self.source_name.is_empty() {
            return Err(ConfigError::Empty("source_name"));
        }

        let p = &self.pipeline;
        if p.buffer_capacity == 0 {
            return Err(ConfigError::NotPositive("pipeline.buffer_capacity"));
        }
        if p.batch_interval_ms == 0 {
            return Err(ConfigError::NotPositive("pipeline.batch_interval_ms"));
        }
        if p.batch_threshold == 0 {
            return Err(ConfigError::NotPositive("pipeline.batch_threshold"));
        }
        if p.max_batch == 0 {
            return Err(ConfigError::NotPositive("pipeline.max_batch"));
        }
        if p.per_connection_cap == 0 {
            return Err(ConfigError::NotPositive("pipeline.per_connection_cap"));
        }
        if p.poll_interval_ms == 0 {
            return Err(ConfigError::NotPositive("pipeline.poll_interval_ms"));
        }
        if p.cleanup_interval_ms == 0 {
            return Err(ConfigError::NotPositive("pipeline.cleanup_interval_ms"));
        }
        if p.stats_interval_secs == 0 {
            return Err(ConfigError::NotPositive("pipeline.stats_interval_secs"));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::NotPositive("reconnect.max_attempts"));
        }
        if self.discovery.service_name.is_empty() {
            return Err(ConfigError::Empty("discovery.service_name"));
        }
        Ok(())
    }

    /// File (from `--config`, `PACKETFALL_AGENT_CONFIG` or the default name),
    /// then environment, then command-line flags.
    pub fn load(cli: &Cli) -> Self {
        let path = cli
            .config
            .clone()
            .or_else(|| {
                std::env::var("PACKETFALL_AGENT_CONFIG")
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let mut config = Self::load_file(&path);
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.apply_cli(cli);
        config
    }

    /// Parse a TOML file, falling back to defaults when it is missing or
    /// unparseable.
    pub fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AgentConfig>(&content) {
                Ok(mut cfg) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    cfg.hub_url = cfg.hub_url.as_deref().map(normalize_hub_url);
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to parse config: {e}, using defaults");
                    AgentConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                AgentConfig::default()
            },
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("PACKETFALL_HUB_URL").filter(|s| !s.is_empty()) {
            self.hub_url = Some(normalize_hub_url(&url));
        }
        if let Some(name) = var("PACKETFALL_SOURCE_NAME").filter(|s| !s.is_empty()) {
            self.source_name = name;
        }
        if let Some(id) = var("PACKETFALL_SOURCE_ID").filter(|s| !s.is_empty()) {
            self.source_id = id;
        }
        if let Some(input) = var("PACKETFALL_INPUT").filter(|s| !s.is_empty()) {
            self.input = Some(PathBuf::from(input));
        }
        if let Some(val) = var("PACKETFALL_DISCOVER")
            && let Ok(b) = val.parse::<bool>()
        {
            self.discover = b;
        }
        if let Some(val) = var("PACKETFALL_DISCOVERY_PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            self.discovery.port = n;
        }
        if let Some(val) = var("PACKETFALL_MAX_RECONNECTS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.reconnect.max_attempts = n;
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(hub) = cli.hub.as_deref().filter(|s| !s.is_empty()) {
            self.hub_url = Some(normalize_hub_url(hub));
        }
        if let Some(name) = cli.name.as_deref().filter(|s| !s.is_empty()) {
            self.source_name = name.to_string();
        }
        if let Some(input) = &cli.input {
            self.input = Some(input.clone());
        }
        if cli.no_discover {
            self.discover = false;
        }
    }

    /// Discovery only runs when no hub was named anywhere.
    pub fn should_discover(&self) -> bool {
        self.discover && self.hub_url.is_none()
    }

    /// `None` means stdin.
    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref().filter(|p| *p != Path::new("-"))
    }
}
