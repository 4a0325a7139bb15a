//! Studio facade
//!
//! Wires the store, the database service and every component together and
//! exposes the operations a front-end needs.

use crate::catalog::{CatalogRefresher, RefreshOutcome};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::notify::Notification;
use crate::query::{ExecutionOutcome, QueryPipeline};
use crate::schema::SchemaSynchronizer;
use crate::service::DatabaseService;
use crate::session::{SessionController, SessionStatus, StartupHandles};
use crate::store::{StudioState, StudioStore, WorkingContext};
use std::sync::Arc;
use uuid::Uuid;

/// The studio core
pub struct Studio {
    store: StudioStore,
    clock: Arc<dyn Clock>,
    session: Arc<SessionController>,
    catalog: CatalogRefresher,
    schema: SchemaSynchronizer,
    queries: QueryPipeline,
    remote_address: Option<String>,
}

impl Studio {
    /// Build every component over one store and one service
    pub async fn new(
        store: StudioStore,
        service: Arc<dyn DatabaseService>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = config.notification_ttl_ms;
        let capacity = config.history_capacity;
        store
            .commit("studio/configure", |state| {
                state.notifications.set_ttl(ttl);
                state.history.set_capacity(capacity);
            })
            .await;

        let catalog = CatalogRefresher::new(
            store.clone(),
            Arc::clone(&service),
            Arc::clone(&clock),
            config.backoff(),
        );
        let schema = SchemaSynchronizer::new(store.clone(), Arc::clone(&service), Arc::clone(&clock));
        let queries = QueryPipeline::new(
            store.clone(),
            Arc::clone(&service),
            schema.clone(),
            Arc::clone(&clock),
        );
        let session = Arc::new(SessionController::new(
            store.clone(),
            service,
            catalog.clone(),
            schema.clone(),
            Arc::new(config.registry()),
            Arc::clone(&clock),
            config.default_database.clone(),
        ));

        Self {
            store,
            clock,
            session,
            catalog,
            schema,
            queries,
            remote_address: config.remote_address.clone(),
        }
    }

    /// Reconcile with the live service and start background tasks
    pub async fn start(&self) -> StartupHandles {
        self.session.start().await
    }

    pub fn store(&self) -> &StudioStore {
        &self.store
    }

    /// Configured default remote address
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    pub async fn snapshot(&self) -> StudioState {
        self.store.snapshot().await
    }

    pub async fn status(&self) -> SessionStatus {
        self.session.status().await
    }

    pub async fn connect_embedded(&self, database: Option<&str>) -> Result<()> {
        self.session.connect_embedded(database).await
    }

    pub async fn connect_remote(&self, address: &str, username: &str, password: &str) -> Result<()> {
        self.session.connect_remote(address, username, password).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    pub async fn select_database(&self, name: &str) -> Result<()> {
        self.session.select_database(name).await
    }

    pub async fn create_database(&self, name: &str) -> Result<()> {
        self.session.create_database(name).await
    }

    /// Refresh the database list
    pub async fn refresh_databases(&self, bypass_backoff: bool) -> RefreshOutcome {
        self.catalog.refresh(bypass_backoff).await
    }

    /// Re-sync the schema of the active database
    pub async fn sync_schema(&self) -> bool {
        let active = self
            .store
            .read(|state| state.session.active_database().map(str::to_string))
            .await;
        match active {
            Some(database) => self.schema.sync(&database).await,
            None => false,
        }
    }

    /// Execute a statement
    pub async fn execute(&self, query: &str, database: Option<&str>) -> ExecutionOutcome {
        self.queries.execute(query, database).await
    }

    /// History, newest first
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.store
            .read(|state| state.history.newest_first().cloned().collect())
            .await
    }

    pub async fn clear_history(&self) {
        self.store
            .commit("history/clear", |state| state.history.clear())
            .await;
    }

    /// Notifications currently showing
    pub async fn notifications(&self) -> Vec<Notification> {
        let now = self.clock.now();
        self.store.read(|state| state.notifications.visible(now)).await
    }

    /// Dismiss a notification; false if it was unknown
    pub async fn dismiss(&self, id: Uuid) -> bool {
        self.store
            .try_commit("notifications/dismiss", |state| {
                state.notifications.dismiss(id).then_some(())
            })
            .await
            .is_some()
    }

    /// Attach working context to the current session
    ///
    /// Refused while disconnected, since a disconnect would clear it.
    pub async fn set_working_context(&self, context: WorkingContext) -> bool {
        self.store
            .try_commit("session/working-context", |state| {
                if !state.session.is_connected() {
                    return None;
                }
                state.working_context = Some(context);
                Some(())
            })
            .await
            .is_some()
    }
}
