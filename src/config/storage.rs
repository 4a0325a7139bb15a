//! Configuration Storage
//!
//! This module handles persistent storage of studio settings: backoff
//! timing, history size, notification delay, saved servers and the
//! location of the state journal.

use crate::catalog::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS};
use crate::error::{Result, StudioError};
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::notify::DEFAULT_NOTIFICATION_TTL_MS;
use crate::servers::{default_servers, SavedServer};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the remote server address
pub const REMOTE_ADDRESS_ENV: &str = "GRAPH_STUDIO_REMOTE_ADDRESS";

/// Default database name for embedded connections
pub const DEFAULT_DATABASE: &str = "default";

/// Persistent configuration data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay after the first failed catalog refresh
    pub backoff_base_ms: u64,
    /// Upper bound on the refresh backoff
    pub backoff_cap_ms: u64,
    /// Number of history entries kept
    pub history_capacity: usize,
    /// Auto-dismiss delay for notifications
    pub notification_ttl_ms: u64,
    /// Database selected by `connect embedded` without a name
    pub default_database: String,
    /// State journal location; `~/.graph-studio/state.db` when unset
    pub journal_path: Option<PathBuf>,
    /// Default address for `connect remote`
    pub remote_address: Option<String>,
    /// Saved servers
    pub servers: Vec<SavedServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            notification_ttl_ms: DEFAULT_NOTIFICATION_TTL_MS,
            default_database: DEFAULT_DATABASE.to_string(),
            journal_path: None,
            remote_address: None,
            servers: default_servers(),
        }
    }
}

impl Config {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| StudioError::Config("Could not find configuration directory".to_string()))?
            .join("graph-studio");

        // Ensure directory exists
        fs::create_dir_all(&config_dir)?;

        Ok(config_dir)
    }

    /// Get the configuration file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if !config_file.exists() {
            // Return default config if file doesn't exist
            return Ok(Self::new());
        }

        let content = fs::read_to_string(&config_file)?;
        Self::from_toml(&content)
    }

    /// Parse configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| StudioError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| StudioError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_file, content)?;

        Ok(())
    }

    /// Apply overrides from the environment
    pub fn apply_env(&mut self) {
        if let Ok(address) = std::env::var(REMOTE_ADDRESS_ENV) {
            if !address.trim().is_empty() {
                self.remote_address = Some(address);
            }
        }
    }
}
