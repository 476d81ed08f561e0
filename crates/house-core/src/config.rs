//! Configuration system for House.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HOUSE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/house/config.toml
//!   3. ~/.config/house/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::category::Category;
use crate::identity::{HouseIdentifier, Role};
use crate::wire;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HouseConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub handshake: HandshakeConfig,
    pub worker: WorkerConfig,
    pub outbox: OutboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub role: Role,
    /// Fixed identifier. Unset = read from the identity cache, minting one on
    /// first run.
    pub identifier: Option<HouseIdentifier>,
    /// Key-value file the identifier is persisted in.
    pub cache_path: PathBuf,
    /// Categories this device declares during the handshake.
    pub categories: BTreeSet<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub hub_port: u16,
    pub extension_port: u16,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub beacon_interval_secs: u64,
    /// How often the keep-alive tick checks for silence.
    pub keepalive_secs: u64,
    /// Reopen discovery after this long without contact from any peer.
    pub rediscover_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Receive deadline for each handshake step.
    pub step_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_timeout_secs: u64,
    /// A worker whose peer has been silent this long stops at the next
    /// poll timeout.
    pub idle_timeout_secs: u64,
    pub read_buffer_bytes: usize,
    /// A write still blocked after this long stops the worker.
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub default_expiry_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            role: Role::Extension,
            identifier: None,
            cache_path: data_dir().join("cache"),
            categories: BTreeSet::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hub_port: wire::HUB_PORT,
            extension_port: wire::EXTENSION_PORT,
            multicast_group: wire::MULTICAST_GROUP,
            multicast_port: wire::MULTICAST_PORT,
            beacon_interval_secs: 10,
            keepalive_secs: 10,
            rediscover_after_secs: 300,
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: wire::HANDSHAKE_STEP_TIMEOUT_MS,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            idle_timeout_secs: 30,
            read_buffer_bytes: 4096,
            write_timeout_secs: 10,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            default_expiry_secs: 60,
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl NetworkConfig {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_secs(self.beacon_interval_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn rediscover_after(&self) -> Duration {
        Duration::from_secs(self.rediscover_after_secs)
    }
}

impl HandshakeConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl OutboxConfig {
    pub fn default_expiry(&self) -> Duration {
        Duration::from_secs(self.default_expiry_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("house")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("house")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HouseConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`, or fall back to defaults when it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(HouseConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HOUSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            HouseConfig::default().save(&path)?;
        }
        Ok(path)
    }

    /// Serialize to `path`, creating parent directories.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply HOUSE_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("HOUSE_DEVICE__ROLE") {
            match v.to_ascii_lowercase().as_str() {
                "hub" => self.device.role = Role::Hub,
                "extension" => self.device.role = Role::Extension,
                _ => {}
            }
        }
        if let Some(id) = var("HOUSE_DEVICE__IDENTIFIER").and_then(|v| v.parse().ok()) {
            self.device.identifier = Some(id);
        }
        if let Some(p) = var("HOUSE_NETWORK__HUB_PORT").and_then(|v| v.parse().ok()) {
            self.network.hub_port = p;
        }
        if let Some(p) = var("HOUSE_NETWORK__EXTENSION_PORT").and_then(|v| v.parse().ok()) {
            self.network.extension_port = p;
        }
        if let Some(ms) = var("HOUSE_HANDSHAKE__STEP_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.handshake.step_timeout_ms = ms;
        }
    }
}
