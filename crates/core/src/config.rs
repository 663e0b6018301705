//! Configuration management for PairChat.

use crate::error::Result;
use crate::identity::{default_identities, IdentityRecord};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default signaling relay.
pub const DEFAULT_SIGNALING_SERVER: &str = "127.0.0.1:7400";

/// Upper bound for any configured delay or timeout (one day).
pub const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Signaling servers in priority order (`host:port`).
    pub signaling_servers: Vec<String>,
    /// Budget for one registration attempt against one candidate.
    pub register_timeout_ms: u64,
    /// Budget for a dial to report the link open.
    pub dial_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            signaling_servers: vec![DEFAULT_SIGNALING_SERVER.to_string()],
            register_timeout_ms: 10_000,
            dial_timeout_ms: 10_000,
        }
    }
}

impl TransportConfig {
    /// Registration timeout as a duration.
    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    /// Dial timeout as a duration.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

/// Session behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reconnect attempt `n` waits `n` times this long.
    pub reconnect_base_delay_ms: u64,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Local typing signal stops after this much inactivity.
    pub typing_idle_ms: u64,
    /// Remote typing indicator clears itself after this long.
    pub typing_expiry_ms: u64,
    /// Maximum message length in characters.
    pub max_message_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 2_000,
            max_reconnect_attempts: 5,
            typing_idle_ms: 3_000,
            typing_expiry_ms: 5_000,
            max_message_length: 500,
        }
    }
}

impl SessionConfig {
    /// Base reconnect delay as a duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Typing idle timeout as a duration.
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    /// Remote typing expiry as a duration.
    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Identity table.
    #[serde(default = "default_identities")]
    pub identities: Vec<IdentityRecord>,

    /// Where the chat database lives (None = platform data dir).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            identities: default_identities(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        let config_path = platform::config_file_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.fix_invalid_values();
        Ok(config)
    }

    /// Fix any invalid or empty values with sensible defaults.
    fn fix_invalid_values(&mut self) {
        let defaults = TransportConfig::default();
        self.transport
            .signaling_servers
            .retain(|s| !s.trim().is_empty());
        if self.transport.signaling_servers.is_empty() {
            self.transport.signaling_servers = defaults.signaling_servers;
        }
        if self.transport.register_timeout_ms == 0 {
            self.transport.register_timeout_ms = defaults.register_timeout_ms;
        }
        if self.transport.dial_timeout_ms == 0 {
            self.transport.dial_timeout_ms = defaults.dial_timeout_ms;
        }
        self.transport.register_timeout_ms = self.transport.register_timeout_ms.min(MAX_DELAY_MS);
        self.transport.dial_timeout_ms = self.transport.dial_timeout_ms.min(MAX_DELAY_MS);

        let defaults = SessionConfig::default();
        if self.session.reconnect_base_delay_ms == 0 {
            self.session.reconnect_base_delay_ms = defaults.reconnect_base_delay_ms;
        }
        self.session.reconnect_base_delay_ms = self.session.reconnect_base_delay_ms.min(MAX_DELAY_MS);
        self.session.typing_idle_ms = self.session.typing_idle_ms.min(MAX_DELAY_MS);
        self.session.typing_expiry_ms = self.session.typing_expiry_ms.min(MAX_DELAY_MS);
        if self.session.max_message_length == 0 {
            self.session.max_message_length = defaults.max_message_length;
        }
        if self.identities.is_empty() {
            self.identities = default_identities();
        }
        if matches!(&self.data_dir, Some(dir) if dir.as_os_str().is_empty()) {
            self.data_dir = None;
        }
    }

    /// Save configuration to the default config file.
    pub fn save(&mut self) -> Result<()> {
        self.fix_invalid_values();

        let config_path = platform::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        Ok(())
    }

    /// Load configuration from environment variables, falling back to file/defaults.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `PAIRCHAT_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(servers) = std::env::var("PAIRCHAT_SIGNALING") {
            let servers: Vec<String> = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !servers.is_empty() {
                self.transport.signaling_servers = servers;
            }
        }

        if let Ok(dir) = std::env::var("PAIRCHAT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(platform::data_dir)
    }
}
