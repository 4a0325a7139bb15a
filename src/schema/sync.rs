//! Schema synchronization
//!
//! Fetches the schema of the active database and replaces the catalog
//! wholesale. Failures only degrade the schema view; they are logged and
//! swallowed.

use crate::clock::Clock;
use crate::error::{Result, StudioError};
use crate::schema::model::SchemaCatalog;
use crate::schema::parser::parse_schema;
use crate::service::DatabaseService;
use crate::store::StudioStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keeps the schema catalog in step with the active database
#[derive(Clone)]
pub struct SchemaSynchronizer {
    store: StudioStore,
    service: Arc<dyn DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl SchemaSynchronizer {
    pub fn new(store: StudioStore, service: Arc<dyn DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            service,
            clock,
        }
    }

    /// Sync the schema of `database`
    ///
    /// Returns whether the catalog was replaced. The result is dropped when
    /// the session changed or `database` stopped being the active database
    /// while the fetch was in flight.
    pub async fn sync(&self, database: &str) -> bool {
        let epoch = self.store.read(|state| state.session.epoch()).await;

        let mut catalog = match self.fetch(database).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(database, error = %e, "Schema sync failed");
                return false;
            }
        };

        catalog.database = Some(database.to_string());
        catalog.synced_at = Some(self.clock.now());
        catalog.sort();

        let counts = (
            catalog.entities.len(),
            catalog.relations.len(),
            catalog.attributes.len(),
        );

        let applied = self
            .store
            .try_commit("schema/sync", |state| {
                let current = state.session.epoch() == epoch
                    && state.session.active_database() == Some(database);
                if !current {
                    return None;
                }
                state.schema = catalog;
                Some(())
            })
            .await
            .is_some();

        if applied {
            info!(
                database,
                entities = counts.0,
                relations = counts.1,
                attributes = counts.2,
                "Schema synced"
            );
        } else {
            debug!(database, "Discarding schema for inactive database");
        }
        applied
    }

    /// Structured introspection first, then the textual definition
    async fn fetch(&self, database: &str) -> Result<SchemaCatalog> {
        match self.service.structured_schema(database).await {
            Ok(Some(catalog)) => return Ok(catalog),
            Ok(None) => {}
            Err(e) => {
                warn!(database, error = %e, "Structured schema failed, falling back to text");
            }
        }

        let text = self
            .service
            .schema_text(database)
            .await
            .map_err(|e| StudioError::SchemaFetch(e.to_string()))?;
        parse_schema(&text)
    }
}
