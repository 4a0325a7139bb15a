//! Mode router
//!
//! Presents the embedded engine and the remote client as one service. Only
//! one of them is active at a time; events from the inactive side are
//! dropped.

use crate::error::Result;
use crate::query::kind::TransactionKind;
use crate::schema::model::SchemaCatalog;
use crate::service::{Credentials, DatabaseService, LiveStatus, QueryResponse, ServiceEvent};
use crate::session::ConnectionMode;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

struct Shared {
    active: Mutex<Option<ConnectionMode>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl Shared {
    fn active(&self) -> Option<ConnectionMode> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_active(&self, mode: Option<ConnectionMode>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = mode;
    }
}

/// Routes calls to the service for the current connection mode
pub struct ModeRouter {
    embedded: Arc<dyn DatabaseService>,
    remote: Arc<dyn DatabaseService>,
    shared: Arc<Shared>,
}

impl ModeRouter {
    /// Create a router and start forwarding child events
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(embedded: Arc<dyn DatabaseService>, remote: Arc<dyn DatabaseService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            active: Mutex::new(None),
            events,
        });

        for (mode, child) in [
            (ConnectionMode::Embedded, &embedded),
            (ConnectionMode::Remote, &remote),
        ] {
            tokio::spawn(forward(mode, child.subscribe(), Arc::clone(&shared)));
        }

        Self {
            embedded,
            remote,
            shared,
        }
    }

    fn child(&self, mode: ConnectionMode) -> &Arc<dyn DatabaseService> {
        match mode {
            ConnectionMode::Embedded => &self.embedded,
            ConnectionMode::Remote => &self.remote,
        }
    }

    /// The active child, or the embedded engine when nothing is active
    fn current(&self) -> &Arc<dyn DatabaseService> {
        self.child(self.shared.active().unwrap_or(ConnectionMode::Embedded))
    }
}

/// Republish events of one child while it is the active side
async fn forward(mode: ConnectionMode, mut rx: broadcast::Receiver<ServiceEvent>, shared: Arc<Shared>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if shared.active() == Some(mode) {
                    let _ = shared.events.send(event);
                } else {
                    debug!(%mode, ?event, "Dropping event from inactive service");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(%mode, skipped, "Event forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[async_trait]
impl DatabaseService for ModeRouter {
    fn status(&self) -> LiveStatus {
        match self.shared.active() {
            Some(mode) => self.child(mode).status(),
            None => LiveStatus::Disconnected,
        }
    }

    fn mode(&self) -> Option<ConnectionMode> {
        self.shared.active().and_then(|mode| self.child(mode).mode())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.shared.events.subscribe()
    }

    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let mode = credentials.mode();
        if let Some(previous) = self.shared.active().filter(|m| *m != mode) {
            info!(from = %previous, to = %mode, "Switching connection mode");
            self.child(previous).disconnect().await?;
        }

        self.shared.set_active(Some(mode));
        let result = self.child(mode).connect(credentials).await;
        if result.is_err() {
            self.shared.set_active(None);
        }
        result
    }

    async fn disconnect(&self) -> Result<()> {
        match self.shared.active() {
            Some(mode) => self.child(mode).disconnect().await,
            None => Ok(()),
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.current().list_databases().await
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.current().create_database(name).await
    }

    async fn execute_query(
        &self,
        database: &str,
        query: &str,
        kind: TransactionKind,
    ) -> Result<QueryResponse> {
        self.current().execute_query(database, query, kind).await
    }

    async fn schema_text(&self, database: &str) -> Result<String> {
        self.current().schema_text(database).await
    }

    async fn structured_schema(&self, database: &str) -> Result<Option<SchemaCatalog>> {
        self.current().structured_schema(database).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{HttpService, MemoryEngine};

    #[tokio::test]
    async fn test_routes_to_embedded_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let remote = Arc::new(HttpService::new().unwrap());
        let router = ModeRouter::new(engine.clone(), remote);
        let mut events = router.subscribe();

        assert_eq!(router.status(), LiveStatus::Disconnected);
        router.connect(&Credentials::Embedded).await.unwrap();
        assert_eq!(router.status(), LiveStatus::Connected);
        assert_eq!(router.mode(), Some(ConnectionMode::Embedded));

        router.create_database("db").await.unwrap();
        assert_eq!(router.list_databases().await.unwrap(), vec!["db"]);

        assert_eq!(
            events.recv().await.unwrap(),
            ServiceEvent::StatusChanged(LiveStatus::Connected)
        );

        engine.reset();
        assert_eq!(router.status(), LiveStatus::Disconnected);
    }
}
