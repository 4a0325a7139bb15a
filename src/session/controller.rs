//! Session controller
//!
//! Owns every transition of the connection session: startup reconciliation,
//! mirroring of live status pushes, explicit connect/disconnect and the
//! background auto-reconnect after an engine reset.

use crate::catalog::CatalogRefresher;
use crate::clock::Clock;
use crate::error::{Result, StudioError};
use crate::notify::NotificationLevel;
use crate::query::classify;
use crate::query::kind::TransactionKind;
use crate::schema::{SchemaCatalog, SchemaSynchronizer};
use crate::servers::{DemoDefinition, ServerRegistry};
use crate::service::{Credentials, DatabaseService, ServiceEvent};
use crate::session::reconcile::{mirror_status, reconcile, SideEffectPlan};
use crate::session::{ConnectionMode, ResumeHint, SessionStatus};
use crate::store::StudioStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background tasks started by `SessionController::start`
#[derive(Debug)]
pub struct StartupHandles {
    /// Mirrors live status and mode pushes into the session
    pub listener: JoinHandle<()>,
    /// Auto-reconnect, when reconciliation planned one
    pub reconnect: Option<JoinHandle<()>>,
}

/// Drives the connection session
pub struct SessionController {
    store: StudioStore,
    service: Arc<dyn DatabaseService>,
    catalog: CatalogRefresher,
    schema: SchemaSynchronizer,
    servers: Arc<ServerRegistry>,
    clock: Arc<dyn Clock>,
    default_database: String,
    /// Latest issued connect/disconnect token
    tokens: AtomicU64,
}

impl SessionController {
    pub fn new(
        store: StudioStore,
        service: Arc<dyn DatabaseService>,
        catalog: CatalogRefresher,
        schema: SchemaSynchronizer,
        servers: Arc<ServerRegistry>,
        clock: Arc<dyn Clock>,
        default_database: impl Into<String>,
    ) -> Self {
        Self {
            store,
            service,
            catalog,
            schema,
            servers,
            clock,
            default_database: default_database.into(),
            tokens: AtomicU64::new(0),
        }
    }

    /// Reconcile the persisted session with the live service and start
    /// listening for status pushes
    ///
    /// The listener is subscribed before reconciliation so no push is lost.
    /// A planned auto-reconnect runs on a separate task after one yield.
    pub async fn start(self: &Arc<Self>) -> StartupHandles {
        let events = self.service.subscribe();
        let live = self.service.status();
        let now = self.clock.now();

        let plan = self
            .store
            .commit("session/reconcile", |state| {
                let outcome = reconcile(&state.session, live, &self.servers, now);
                state.session = outcome.session;
                if outcome.clear_dependents {
                    state.clear_dependents();
                }
                outcome.plan
            })
            .await;

        info!(live = ?live, plan = ?plan, "Session reconciled");

        let listener = tokio::spawn(listen(Arc::downgrade(self), events));

        let reconnect = match plan {
            SideEffectPlan::AutoReconnect(hint) => {
                let controller = Arc::clone(self);
                Some(tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    controller.auto_reconnect(hint).await;
                }))
            }
            SideEffectPlan::None => None,
        };

        StartupHandles { listener, reconnect }
    }

    /// Current session status
    pub async fn status(&self) -> SessionStatus {
        self.store.read(|state| state.session.status()).await
    }

    /// Connect to the embedded engine and select `database`
    ///
    /// Uses the default database when none is given, creating it if absent.
    pub async fn connect_embedded(&self, database: Option<&str>) -> Result<()> {
        let token = self.next_token();
        let database = database.unwrap_or(&self.default_database).to_string();
        let server_ref = self
            .servers
            .servers()
            .iter()
            .find(|s| s.is_local() && !s.is_demo())
            .map(|s| s.id.clone());

        self.begin_connect(ConnectionMode::Embedded, None, None).await;

        let connected = async {
            self.service.connect(&Credentials::Embedded).await?;
            self.ensure_database(&database).await?;
            Ok::<(), StudioError>(())
        }
        .await;

        self.finish_connect(token, connected, Some(database), server_ref)
            .await
    }

    /// Connect to a remote server
    ///
    /// No database is selected until the user picks one.
    pub async fn connect_remote(&self, address: &str, username: &str, password: &str) -> Result<()> {
        let token = self.next_token();
        let server_ref = self
            .servers
            .servers()
            .iter()
            .find(|s| s.address.as_deref() == Some(address))
            .map(|s| s.id.clone());

        self.begin_connect(
            ConnectionMode::Remote,
            Some(address.to_string()),
            Some(username.to_string()),
        )
        .await;

        let credentials = Credentials::Remote {
            address: address.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        let connected = self.service.connect(&credentials).await;

        self.finish_connect(token, connected, None, server_ref).await
    }

    /// Disconnect and clear everything that depends on the session
    pub async fn disconnect(&self) -> Result<()> {
        let token = self.next_token();
        let result = self.service.disconnect().await;

        if self.is_current(token) {
            let now = self.clock.now();
            self.store
                .commit("session/disconnect", |state| state.clear_for_disconnect(now))
                .await;
            info!("Disconnected");
        }

        result.map_err(as_connection_error)
    }

    /// Make `name` the active database and sync its schema
    pub async fn select_database(&self, name: &str) -> Result<()> {
        let selected = self
            .store
            .commit("session/select-database", |state| {
                let changed = state.session.active_database() != Some(name);
                if state.session.set_active_database(Some(name.to_string())) {
                    if changed {
                        state.working_context = None;
                        state.schema = SchemaCatalog::new();
                    }
                    true
                } else {
                    false
                }
            })
            .await;
        if !selected {
            return Err(StudioError::NotConnected);
        }

        info!(database = name, "Database selected");
        self.schema.sync(name).await;
        Ok(())
    }

    /// Create a database and refresh the catalog
    pub async fn create_database(&self, name: &str) -> Result<()> {
        let connected = self.store.read(|state| state.session.is_connected()).await;
        if !connected {
            return Err(StudioError::NotConnected);
        }
        self.service.create_database(name).await?;
        info!(database = name, "Database created");
        self.catalog.refresh(true).await;
        Ok(())
    }

    fn next_token(&self) -> u64 {
        self.tokens.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, token: u64) -> bool {
        self.tokens.load(Ordering::SeqCst) == token
    }

    async fn begin_connect(
        &self,
        mode: ConnectionMode,
        address: Option<String>,
        username: Option<String>,
    ) {
        let now = self.clock.now();
        self.store
            .commit("session/connecting", |state| {
                state.session.set_status(SessionStatus::Connecting, now);
                state.session.mode = mode;
                state.session.address = address;
                state.session.username = username;
                state.clear_dependents();
            })
            .await;
        debug!(%mode, "Connecting");
    }

    async fn finish_connect(
        &self,
        token: u64,
        connected: Result<()>,
        database: Option<String>,
        server_ref: Option<String>,
    ) -> Result<()> {
        if let Err(e) = connected {
            if !self.is_current(token) {
                return Err(StudioError::Superseded);
            }
            let now = self.clock.now();
            self.store
                .commit("session/connect-failed", |state| state.clear_for_disconnect(now))
                .await;
            warn!(error = %e, "Connect failed");
            return Err(as_connection_error(e));
        }

        let now = self.clock.now();
        let committed = self
            .store
            .try_commit("session/connected", |state| {
                if !self.is_current(token) {
                    return None;
                }
                state.session.set_status(SessionStatus::Connected, now);
                state.session.set_active_database(database.clone());
                state.session.saved_server_ref = server_ref;
                Some(())
            })
            .await;
        if committed.is_none() {
            debug!(token, "Connect superseded");
            return Err(StudioError::Superseded);
        }

        info!(database = ?database, "Connected");
        self.after_connect(database.as_deref()).await;
        Ok(())
    }

    /// Refresh the catalog and sync the schema of the selected database
    async fn after_connect(&self, database: Option<&str>) {
        self.catalog.refresh(true).await;
        if let Some(database) = database {
            self.schema.sync(database).await;
        }
    }

    /// Create `name` unless the engine already lists it
    ///
    /// Returns whether the database was created.
    async fn ensure_database(&self, name: &str) -> Result<bool> {
        let databases = self.service.list_databases().await?;
        if databases.iter().any(|d| d == name) {
            return Ok(false);
        }
        self.service.create_database(name).await?;
        debug!(database = name, "Created missing database");
        Ok(true)
    }

    /// Reconnect to the embedded engine after it lost its state
    ///
    /// Failures are reported as a notification, never returned.
    async fn auto_reconnect(&self, hint: ResumeHint) {
        let token = self.next_token();
        let now = self.clock.now();
        self.store
            .commit("session/reconnecting", |state| {
                state.session.set_status(SessionStatus::Reconnecting, now);
                state.session.mode = ConnectionMode::Embedded;
            })
            .await;

        let demo = hint
            .saved_server_ref
            .as_deref()
            .and_then(|id| self.servers.get(id))
            .and_then(|server| self.servers.demo_for(server))
            .cloned();
        let target = demo
            .as_ref()
            .map(|d| d.id.clone())
            .or_else(|| hint.active_database.clone())
            .unwrap_or_else(|| self.default_database.clone());

        info!(database = %target, demo = demo.is_some(), "Reconnecting to embedded engine");

        let restored = self.restore(&target, demo.as_ref()).await;
        let now = self.clock.now();

        match restored {
            Ok(()) => {
                let committed = self
                    .store
                    .try_commit("session/reconnected", |state| {
                        if !self.is_current(token) {
                            return None;
                        }
                        state.session.set_status(SessionStatus::Connected, now);
                        state.session.set_active_database(Some(target.clone()));
                        state.session.saved_server_ref = hint.saved_server_ref.clone();
                        state.notifications.push(
                            NotificationLevel::Success,
                            format!("Reconnected to {}", target),
                            now,
                        );
                        Some(())
                    })
                    .await;
                if committed.is_some() {
                    self.after_connect(Some(&target)).await;
                }
            }
            Err(e) => {
                warn!(database = %target, error = %e, "Auto-reconnect failed");
                self.store
                    .try_commit("session/reconnect-failed", |state| {
                        if !self.is_current(token) {
                            return None;
                        }
                        state.clear_for_disconnect(now);
                        state.notifications.push(
                            NotificationLevel::Warning,
                            format!("Could not reconnect: {}", e),
                            now,
                        );
                        Some(())
                    })
                    .await;
            }
        }
    }

    /// Connect, recreate the target database and replay demo data into it
    async fn restore(&self, target: &str, demo: Option<&DemoDefinition>) -> Result<()> {
        self.service.connect(&Credentials::Embedded).await?;
        let created = self.ensure_database(target).await?;

        if let (true, Some(demo)) = (created, demo) {
            self.replay(target, demo).await;
        }
        Ok(())
    }

    /// Run a demo's schema and sample data, skipping statements that fail
    async fn replay(&self, database: &str, demo: &DemoDefinition) {
        if let Err(e) = self
            .service
            .execute_query(database, &demo.schema, TransactionKind::Schema)
            .await
        {
            warn!(demo = %demo.id, error = %e, "Demo schema failed");
        }

        let mut failed = 0;
        for statement in &demo.sample_data {
            if let Err(e) = self
                .service
                .execute_query(database, statement, classify(statement))
                .await
            {
                failed += 1;
                warn!(demo = %demo.id, error = %e, "Demo statement failed");
            }
        }
        info!(
            demo = %demo.id,
            statements = demo.sample_data.len(),
            failed,
            "Demo data replayed"
        );
    }

    /// Mirror one service push into the session
    ///
    /// Pushes whose payload no longer matches the service are stale.
    async fn mirror(&self, event: ServiceEvent) {
        let now = self.clock.now();
        match event {
            ServiceEvent::StatusChanged(live) if live != self.service.status() => {
                debug!(?live, "Dropping stale status push");
            }
            ServiceEvent::StatusChanged(live) => {
                let mirrored = self
                    .store
                    .try_commit("session/mirror-status", |state| {
                        let next = mirror_status(state.session.status(), live)?;
                        if next == SessionStatus::Disconnected {
                            state.clear_for_disconnect(now);
                        } else {
                            state.session.set_status(next, now);
                        }
                        Some(next)
                    })
                    .await;
                if let Some(status) = mirrored {
                    info!(%status, "Session status mirrored from service");
                }
            }
            ServiceEvent::ModeChanged(None) => {}
            ServiceEvent::ModeChanged(Some(mode)) if self.service.mode() != Some(mode) => {
                debug!(?mode, "Dropping stale mode push");
            }
            ServiceEvent::ModeChanged(Some(mode)) => {
                self.store
                    .try_commit("session/mirror-mode", |state| {
                        if state.session.mode == mode || state.session.status().is_transitional() {
                            return None;
                        }
                        state.session.mode = mode;
                        Some(())
                    })
                    .await;
            }
        }
    }
}

/// Wrap a service failure as a connection error
fn as_connection_error(e: StudioError) -> StudioError {
    match e {
        StudioError::Connection(_) | StudioError::Superseded => e,
        other => StudioError::connection(other),
    }
}

/// Mirror service pushes until the controller or the service goes away
async fn listen(controller: Weak<SessionController>, mut events: broadcast::Receiver<ServiceEvent>) {
    loop {
        let received = events.recv().await;
        let Some(controller) = controller.upgrade() else {
            break;
        };

        match received {
            Ok(event) => controller.mirror(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed pushes: fall back to the current live status
                warn!(skipped, "Session listener lagged behind service events");
                let live = controller.service.status();
                controller.mirror(ServiceEvent::StatusChanged(live)).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Session listener stopped");
}
