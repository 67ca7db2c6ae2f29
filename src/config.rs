//! netkey Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./netkey.yaml` (current directory - highest priority)
//! 2. `~/.config/netkey/netkey.yaml` (user config directory)
//! 3. `/etc/netkey/netkey.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority
//! files. Every field is optional; unset fields fall back to the defaults
//! baked into the getters.
//!
//! ```yaml
//! interface:
//!   name: eth0
//!   bring_down: true
//! exchange:
//!   group: "ff02::1"
//!   port: 30621
//!   retry_interval_secs: 10
//! ```

use crate::protocol::{DEFAULT_GROUP, DEFAULT_PORT, MAX_DATAGRAM_LEN};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config filename.
const CONFIG_FILENAME: &str = "netkey.yaml";

/// Default interface to bring up and listen on.
const DEFAULT_INTERFACE: &str = "eth0";

/// Default interval between request broadcasts.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// Default number of silent windows before the sender gives up.
const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid multicast group {group}: {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Interface configuration (`interface.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceConfig {
    /// Interface to bring up (`interface.name`). Defaults to "eth0".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Take the interface down again after the exchange
    /// (`interface.bring_down`). Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bring_down: Option<bool>,
}

impl InterfaceConfig {
    /// Get the interface name, using default if not configured.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_INTERFACE)
    }

    /// Whether to reverse the bring-up once the exchange is over.
    pub fn bring_down(&self) -> bool {
        self.bring_down.unwrap_or(true)
    }
}

/// Exchange configuration (`exchange.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    /// Multicast group (`exchange.group`). Defaults to "ff02::1".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// UDP port (`exchange.port`). Defaults to 30621.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Seconds between request broadcasts (`exchange.retry_interval_secs`).
    /// Defaults to 10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_interval_secs: Option<u64>,

    /// Receive buffer size including the tag byte (`exchange.buffer_size`).
    /// Defaults to 2048.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,

    /// Ring the terminal bell on each request (`exchange.bell`).
    /// Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bell: Option<bool>,

    /// Silent windows the sender tolerates before giving up
    /// (`exchange.max_attempts`). Defaults to 30.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl ExchangeConfig {
    /// Get the multicast group as configured (unparsed).
    pub fn group_str(&self) -> &str {
        self.group.as_deref().unwrap_or(DEFAULT_GROUP)
    }

    /// Parse the multicast group.
    pub fn group(&self) -> Result<Ipv6Addr, ConfigError> {
        let raw = self.group_str();
        let group: Ipv6Addr = raw.parse().map_err(|e| ConfigError::InvalidGroup {
            group: raw.to_string(),
            reason: format!("{}", e),
        })?;
        if !group.is_multicast() {
            return Err(ConfigError::InvalidGroup {
                group: raw.to_string(),
                reason: "not a multicast address".to_string(),
            });
        }
        Ok(group)
    }

    /// Get the UDP port, using default if not configured.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Get the retry interval, using default if not configured.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.unwrap_or(DEFAULT_RETRY_INTERVAL_SECS))
    }

    /// Get the receive buffer size, using default if not configured.
    ///
    /// Clamped to `1..=MAX_DATAGRAM_LEN` so the command tag always fits.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
            .unwrap_or(MAX_DATAGRAM_LEN)
            .clamp(1, MAX_DATAGRAM_LEN)
    }

    /// Whether to ring the terminal bell before each request.
    pub fn bell(&self) -> bool {
        self.bell.unwrap_or(true)
    }

    /// Get the sender's attempt limit, using default if not configured.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Reject values the exchange cannot run with.
    ///
    /// A zero retry interval would broadcast requests back to back.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.group()?;

        if self.retry_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "exchange.retry_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        if let Some(size) = self.buffer_size {
            if !(1..=MAX_DATAGRAM_LEN).contains(&size) {
                return Err(ConfigError::InvalidValue {
                    field: "exchange.buffer_size",
                    reason: format!("{} is outside 1..={}", size, MAX_DATAGRAM_LEN),
                });
            }
        }

        Ok(())
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Interface configuration (`interface.*`).
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Exchange configuration (`exchange.*`).
    #[serde(default)]
    pub exchange: ExchangeConfig,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        config.exchange.validate()?;
        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.exchange.validate()?;
        Ok(config)
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/netkey").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("netkey").join(CONFIG_FILENAME));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: Config) {
        if other.interface.name.is_some() {
            self.interface.name = other.interface.name;
        }
        if other.interface.bring_down.is_some() {
            self.interface.bring_down = other.interface.bring_down;
        }

        let exchange = other.exchange;
        if exchange.group.is_some() {
            self.exchange.group = exchange.group;
        }
        if exchange.port.is_some() {
            self.exchange.port = exchange.port;
        }
        if exchange.retry_interval_secs.is_some() {
            self.exchange.retry_interval_secs = exchange.retry_interval_secs;
        }
        if exchange.buffer_size.is_some() {
            self.exchange.buffer_size = exchange.buffer_size;
        }
        if exchange.bell.is_some() {
            self.exchange.bell = exchange.bell;
        }
        if exchange.max_attempts.is_some() {
            self.exchange.max_attempts = exchange.max_attempts;
        }
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
