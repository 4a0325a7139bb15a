//! Configuration module
//!
//! This module handles configuration management: loading the stored
//! settings and turning them into the policies the studio components use.

pub mod storage;

use crate::catalog::BackoffPolicy;
use crate::error::Result;
use crate::servers::ServerRegistry;
use crate::store::SnapshotJournal;
use std::path::PathBuf;
use tracing::warn;

// Re-exports
pub use storage::Config;

/// Load configuration from disk with environment overrides
///
/// An unreadable file falls back to defaults.
pub fn load_config() -> Config {
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Using default configuration");
            Config::default()
        }
    };
    config.apply_env();
    config
}

impl Config {
    /// Backoff policy for catalog refreshes
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base_ms, self.backoff_cap_ms)
    }

    /// Registry of the configured servers
    pub fn registry(&self) -> ServerRegistry {
        ServerRegistry::new(self.servers.clone())
    }

    /// Where the state journal lives
    pub fn resolved_journal_path(&self) -> Result<PathBuf> {
        match &self.journal_path {
            Some(path) => Ok(path.clone()),
            None => SnapshotJournal::default_path(),
        }
    }
}
