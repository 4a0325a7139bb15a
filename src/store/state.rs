//! Studio state
//!
//! Everything the presentation layer observes, in one value. The durable
//! slices are split out as `DurableState` for the journal.

use crate::catalog::DatabaseCatalog;
use crate::history::QueryHistory;
use crate::notify::Notifications;
use crate::query::QueryResultState;
use crate::schema::model::SchemaCatalog;
use crate::session::{ConnectionSession, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context that only makes sense for the current session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingContext {
    /// Lesson open alongside the session
    pub lesson_id: Option<String>,
    /// Unsaved query text
    pub draft_query: Option<String>,
}

/// Complete studio state
#[derive(Debug, Clone, Default)]
pub struct StudioState {
    pub session: ConnectionSession,
    pub catalog: DatabaseCatalog,
    pub schema: SchemaCatalog,
    pub query: QueryResultState,
    pub history: QueryHistory,
    pub working_context: Option<WorkingContext>,
    pub notifications: Notifications,
}

/// Slices of the state that survive a restart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DurableState {
    pub session: ConnectionSession,
    pub catalog: DatabaseCatalog,
    pub schema: SchemaCatalog,
    pub history: QueryHistory,
    pub working_context: Option<WorkingContext>,
}

impl StudioState {
    /// Fresh state with a history of the given capacity
    pub fn new(history_capacity: usize) -> Self {
        Self {
            history: QueryHistory::new(history_capacity),
            ..Self::default()
        }
    }

    /// Rebuild state from a journal snapshot
    pub fn from_durable(durable: DurableState) -> Self {
        let mut catalog = durable.catalog;
        catalog.is_loading = false;
        let mut session = durable.session;
        if !session.is_connected() {
            // Snapshots bypass the status guard
            session.set_active_database(None);
            session.connected_at = None;
        }
        Self {
            session,
            catalog,
            schema: durable.schema,
            history: durable.history,
            working_context: durable.working_context,
            ..Self::default()
        }
    }

    /// Copy of the durable slices
    pub fn durable(&self) -> DurableState {
        DurableState {
            session: self.session.clone(),
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            history: self.history.clone(),
            working_context: self.working_context.clone(),
        }
    }

    /// Clear everything that depends on a live session
    pub fn clear_dependents(&mut self) {
        self.catalog.reset();
        self.schema = SchemaCatalog::new();
        self.working_context = None;
    }

    /// The single disconnect transition
    pub fn clear_for_disconnect(&mut self, now: DateTime<Utc>) {
        self.session.set_status(SessionStatus::Disconnected, now);
        self.clear_dependents();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatabaseEntry;
    use crate::schema::model::EntityType;

    #[test]
    fn test_disconnect_clears_dependents() {
        let now = Utc::now();
        let mut state = StudioState::new(10);
        state.session.set_status(SessionStatus::Connected, now);
        state.session.set_active_database(Some("db1".to_string()));
        state.catalog.databases.push(DatabaseEntry {
            name: "db1".to_string(),
            last_seen_at: now,
        });
        state.catalog.is_stale = false;
        state.schema.entities.push(EntityType::new("person"));
        state.working_context = Some(WorkingContext::default());

        state.clear_for_disconnect(now);

        assert_eq!(state.session.status(), SessionStatus::Disconnected);
        assert_eq!(state.session.active_database(), None);
        assert!(state.catalog.databases.is_empty());
        assert!(state.catalog.is_stale);
        assert!(state.schema.is_empty());
        assert!(state.working_context.is_none());
    }

    #[test]
    fn test_restore_never_resumes_loading() {
        let mut durable = DurableState::default();
        durable.catalog.is_loading = true;
        let state = StudioState::from_durable(durable);
        assert!(!state.catalog.is_loading);
    }

    #[test]
    fn test_restore_drops_database_without_connection() {
        let durable: DurableState = serde_json::from_value(serde_json::json!({
            "session": {
                "status": "disconnected",
                "mode": "embedded",
                "activeDatabase": "db1",
                "connectedAt": "2024-03-01T10:00:00Z",
                "epoch": 3
            }
        }))
        .unwrap();
        assert_eq!(durable.session.active_database(), Some("db1"));

        let state = StudioState::from_durable(durable);
        assert_eq!(state.session.status(), SessionStatus::Disconnected);
        assert_eq!(state.session.active_database(), None);
        assert_eq!(state.session.connected_at, None);
        assert_eq!(state.session.epoch(), 3);
    }
}
