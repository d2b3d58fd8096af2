//! Server configuration, parsed from a TOML file plus environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shhh_core::StoreConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Ten years; keeps every deadline representable
const MAX_RETENTION_CEILING: u64 = 10 * 365 * 86400;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener and logging
    #[serde(default)]
    pub server: ServerSection,

    /// Store and request limits
    #[serde(default)]
    pub limits: LimitsSection,
}

/// Listener and logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Socket address to bind
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
        }
    }
}

/// Store and request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Maximum number of secrets held at once
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Maximum secret or file size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum passphrase length in characters
    #[serde(default = "default_max_phrase_size")]
    pub max_phrase_size: usize,

    /// Longest a secret may live, in seconds
    #[serde(default = "default_max_retention")]
    pub max_retention_secs: u64,

    /// Sweeper wake-up interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_file_size: default_max_file_size(),
            max_phrase_size: default_max_phrase_size(),
            max_retention_secs: default_max_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_items() -> usize {
    1000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_max_phrase_size() -> usize {
    256
}

fn default_max_retention() -> u64 {
    86400 // 24 hours
}

fn default_sweep_interval() -> u64 {
    60
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Load the first config file found in the default locations, or the
    /// defaults if there is none.
    pub fn discover() -> Result<(Self, Option<PathBuf>)> {
        for path in default_paths() {
            if path.is_file() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `SHHH_LISTEN`
    /// - `SHHH_LOG_LEVEL`
    /// - `SHHH_MAX_ITEMS`
    /// - `SHHH_MAX_FILE_SIZE`
    /// - `SHHH_MAX_PHRASE_SIZE`
    /// - `SHHH_MAX_RETENTION`
    /// - `SHHH_SWEEP_INTERVAL`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("SHHH_LISTEN") {
            self.server.listen = v;
        }
        if let Some(v) = get("SHHH_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Some(n) = get("SHHH_MAX_ITEMS").and_then(|v| v.parse().ok()) {
            self.limits.max_items = n;
        }
        if let Some(n) = get("SHHH_MAX_FILE_SIZE").and_then(|v| v.parse().ok()) {
            self.limits.max_file_size = n;
        }
        if let Some(n) = get("SHHH_MAX_PHRASE_SIZE").and_then(|v| v.parse().ok()) {
            self.limits.max_phrase_size = n;
        }
        if let Some(secs) = get("SHHH_MAX_RETENTION").and_then(|v| v.parse().ok()) {
            self.limits.max_retention_secs = secs;
        }
        if let Some(secs) = get("SHHH_SWEEP_INTERVAL").and_then(|v| v.parse().ok()) {
            self.limits.sweep_interval_secs = secs;
        }
    }

    /// Parsed listen address. Call [`ServerConfig::validate`] first.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.server.listen))
    }

    /// Limits handed to the secret store.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_items: self.limits.max_items,
            max_payload_bytes: self.limits.max_file_size,
            max_retention: chrono::Duration::seconds(self.limits.max_retention_secs as i64),
            sweep_interval: Duration::from_secs(self.limits.sweep_interval_secs),
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        anyhow::ensure!(self.limits.max_items > 0, "limits.max_items must be > 0");
        anyhow::ensure!(
            self.limits.max_file_size > 0,
            "limits.max_file_size must be > 0"
        );
        anyhow::ensure!(
            self.limits.max_phrase_size > 0,
            "limits.max_phrase_size must be > 0"
        );

        anyhow::ensure!(
            self.limits.max_retention_secs > 0
                && self.limits.max_retention_secs <= MAX_RETENTION_CEILING,
            "limits.max_retention_secs must be between 1 and {}",
            MAX_RETENTION_CEILING
        );

        anyhow::ensure!(
            self.limits.sweep_interval_secs >= 1,
            "limits.sweep_interval_secs must be >= 1"
        );

        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/shhh/config.toml` (or `~/.config/...`), then `./shhh.toml`.
fn default_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let config_home = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = config_home {
        paths.push(dir.join("shhh").join("config.toml"));
    }

    paths.push(PathBuf::from("shhh.toml"));
    paths
}

// ============================================================================
// Tests
// ============================================================================
