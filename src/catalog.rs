//! Database catalog
//!
//! The cached list of databases on the connected server, refreshed on
//! demand with exponential backoff after failures. Refresh failures never
//! reach the caller: they are recorded on the catalog and surfaced as a
//! notification.

use crate::clock::Clock;
use crate::notify::NotificationLevel;
use crate::service::DatabaseService;
use crate::store::StudioStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default delay after the first failure
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default upper bound on the backoff delay
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// A database seen on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEntry {
    pub name: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Cached database list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseCatalog {
    pub databases: Vec<DatabaseEntry>,
    pub is_loading: bool,
    pub is_stale: bool,
    pub last_error: Option<String>,
    pub refresh_retry_count: u32,
    pub next_allowed_refresh_at: Option<DateTime<Utc>>,
}

impl Default for DatabaseCatalog {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            is_loading: false,
            is_stale: true,
            last_error: None,
            refresh_retry_count: 0,
            next_allowed_refresh_at: None,
        }
    }
}

impl DatabaseCatalog {
    /// Back to empty and stale
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether a database with this name was listed
    pub fn contains(&self, name: &str) -> bool {
        self.databases.iter().any(|d| d.name == name)
    }

    /// Database names in display order
    pub fn names(&self) -> Vec<&str> {
        self.databases.iter().map(|d| d.name.as_str()).collect()
    }
}

/// Exponential backoff between failed refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    /// Delay after `retry_count` consecutive failures: `min(base * 2^k, cap)`
    pub fn delay(&self, retry_count: u32) -> Duration {
        let ms = 2u64
            .checked_pow(retry_count)
            .and_then(|factor| self.base_ms.checked_mul(factor))
            .map_or(self.cap_ms, |ms| ms.min(self.cap_ms));
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_CAP_MS)
    }
}

/// What a refresh call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Session not connected; nothing happened
    NotConnected,
    /// Still inside the backoff window; nothing happened
    BackedOff,
    /// Another refresh is already loading
    InFlight,
    /// The list was replaced with this many databases
    Refreshed(usize),
    /// The call failed and the backoff window moved forward
    Failed(String),
    /// The session changed while the call was in flight
    Discarded,
}

/// Refreshes the database catalog
#[derive(Clone)]
pub struct CatalogRefresher {
    store: StudioStore,
    service: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
}

impl CatalogRefresher {
    pub fn new(
        store: StudioStore,
        service: Arc<dyn DatabaseService>,
        clock: Arc<dyn Clock>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            service,
            clock,
            backoff,
        }
    }

    /// Refresh the database list
    ///
    /// Without `bypass_backoff` the call is skipped while a previous failure's
    /// backoff window is open or another refresh is loading.
    pub async fn refresh(&self, bypass_backoff: bool) -> RefreshOutcome {
        let now = self.clock.now();

        let mut skipped = RefreshOutcome::NotConnected;
        let gate = self
            .store
            .try_commit("catalog/refresh-start", |state| {
                if !state.session.is_connected() {
                    return None;
                }
                let catalog = &mut state.catalog;
                if !bypass_backoff {
                    if catalog.next_allowed_refresh_at.is_some_and(|next| now < next) {
                        skipped = RefreshOutcome::BackedOff;
                        return None;
                    }
                    if catalog.is_loading {
                        skipped = RefreshOutcome::InFlight;
                        return None;
                    }
                }
                catalog.is_loading = true;
                Some(state.session.epoch())
            })
            .await;

        let Some(epoch) = gate else {
            debug!(?skipped, "Catalog refresh skipped");
            return skipped;
        };

        let result = self.service.list_databases().await;
        let now = self.clock.now();
        let backoff = self.backoff;

        self.store
            .commit("catalog/refresh-finish", |state| {
                if state.session.epoch() != epoch {
                    debug!(epoch, current = state.session.epoch(), "Discarding stale catalog result");
                    return RefreshOutcome::Discarded;
                }
                let catalog = &mut state.catalog;
                catalog.is_loading = false;

                match result {
                    Ok(mut names) => {
                        names.sort();
                        names.dedup();
                        catalog.databases = names
                            .into_iter()
                            .map(|name| DatabaseEntry {
                                name,
                                last_seen_at: now,
                            })
                            .collect();
                        catalog.refresh_retry_count = 0;
                        catalog.next_allowed_refresh_at = None;
                        catalog.is_stale = false;
                        catalog.last_error = None;
                        info!(count = catalog.databases.len(), "Database catalog refreshed");
                        RefreshOutcome::Refreshed(catalog.databases.len())
                    }
                    Err(e) => {
                        let message = e.to_string();
                        catalog.refresh_retry_count = catalog.refresh_retry_count.saturating_add(1);
                        let delay = backoff.delay(catalog.refresh_retry_count);
                        catalog.next_allowed_refresh_at = Some(now + delay);
                        catalog.is_stale = true;
                        catalog.last_error = Some(message.clone());
                        warn!(
                            retry = catalog.refresh_retry_count,
                            delay_ms = delay.num_milliseconds(),
                            error = %message,
                            "Database catalog refresh failed"
                        );
                        state.notifications.push_transient(
                            NotificationLevel::Error,
                            format!("Failed to refresh databases: {}", message),
                            now,
                        );
                        RefreshOutcome::Failed(message)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::milliseconds(1000));
        assert_eq!(policy.delay(1), Duration::milliseconds(2000));
        assert_eq!(policy.delay(3), Duration::milliseconds(8000));
        assert_eq!(policy.delay(5), Duration::milliseconds(30_000));
        assert_eq!(policy.delay(200), Duration::milliseconds(30_000));
    }

    #[test]
    fn test_reset_marks_stale() {
        let mut catalog = DatabaseCatalog {
            databases: vec![DatabaseEntry {
                name: "db1".to_string(),
                last_seen_at: Utc::now(),
            }],
            is_loading: true,
            is_stale: false,
            last_error: Some("boom".to_string()),
            refresh_retry_count: 2,
            next_allowed_refresh_at: Some(Utc::now()),
        };
        assert!(catalog.contains("db1"));

        catalog.reset();
        assert!(catalog.databases.is_empty());
        assert!(catalog.is_stale);
        assert!(!catalog.is_loading);
        assert_eq!(catalog.refresh_retry_count, 0);
    }
}
