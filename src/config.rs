use crate::notifications::DEFAULT_TTL_SECS;
use crate::ticker::DEFAULT_TICK_MS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on any single remote call
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;

/// Sessions fetched per history page
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Which store implementation backs the state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local; nothing outlives the process
    Memory,
    #[default]
    File,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::File => write!(f, "file"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "file" => Ok(Backend::File),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Settings stored in config.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_notification_ttl_secs")]
    pub notification_ttl_secs: u64,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Mirror notifications to the desktop (macOS only)
    #[serde(default)]
    pub desktop_notifications: bool,
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_notification_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS as u64
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            tick_ms: DEFAULT_TICK_MS,
            notification_ttl_secs: DEFAULT_TTL_SECS as u64,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            desktop_notifications: false,
        }
    }
}

impl Config {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    pub fn notification_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.notification_ttl_secs as i64)
    }
}

/// Load config from config.json; a missing file yields the defaults
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config: {}", path.display()))?;
    Ok(config)
}

/// Save config to config.json
pub fn save_config<P: AsRef<Path>>(path: P, config: &Config) -> Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    crate::persistence::atomic_write(path, &json)?;
    Ok(())
}
