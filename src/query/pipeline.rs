//! Query execution pipeline

use crate::clock::Clock;
use crate::history::HistoryEntry;
use crate::query::projection::Projection;
use crate::query::{classify, ExecutionOutcome, QueryResultState};
use crate::schema::SchemaSynchronizer;
use crate::service::DatabaseService;
use crate::store::StudioStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Message returned when there is no database to run against
pub const NO_DATABASE_SELECTED: &str = "No database selected";

/// Runs statements and publishes their results
#[derive(Clone)]
pub struct QueryPipeline {
    store: StudioStore,
    service: Arc<dyn DatabaseService>,
    schema: SchemaSynchronizer,
    clock: Arc<dyn Clock>,
    /// Latest issued request token
    tokens: Arc<AtomicU64>,
}

impl QueryPipeline {
    pub fn new(
        store: StudioStore,
        service: Arc<dyn DatabaseService>,
        schema: SchemaSynchronizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            service,
            schema,
            clock,
            tokens: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Execute one statement
    ///
    /// Runs against `database` if given, else the session's active database.
    /// Engine errors are captured in the result slot and history rather
    /// than returned. Only the most recently started execution writes the
    /// result slot; every execution is recorded in history.
    pub async fn execute(&self, query: &str, database: Option<&str>) -> ExecutionOutcome {
        let database = match database {
            Some(name) => Some(name.to_string()),
            None => {
                self.store
                    .read(|state| state.session.active_database().map(str::to_string))
                    .await
            }
        };
        let Some(database) = database else {
            debug!("Query rejected: no database selected");
            return ExecutionOutcome::rejected(NO_DATABASE_SELECTED);
        };

        let token = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        let kind = classify(query);
        let executed_at = self.clock.now();

        self.store
            .commit("query/start", |state| {
                state.query = QueryResultState::running(query, kind);
            })
            .await;

        let started = Instant::now();
        let result = self.service.execute_query(&database, query, kind).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => {
                let projection = Projection::from_response(query, kind, duration_ms, &response);
                let row_count = projection.row_count;
                let message = projection.summary.clone();
                let entry =
                    HistoryEntry::success(&database, query, executed_at, duration_ms, row_count);

                let stale = self
                    .store
                    .commit("query/success", |state| {
                        state.history.push(entry);
                        if !self.is_current(token) {
                            return true;
                        }
                        let slot = &mut state.query;
                        slot.is_running = false;
                        slot.execution_time_ms = Some(duration_ms);
                        slot.error_message = None;
                        projection.apply(slot);
                        false
                    })
                    .await;

                info!(
                    database = %database,
                    kind = %kind,
                    rows = row_count,
                    duration_ms,
                    stale,
                    "Query executed"
                );

                if response.is_schema_mutation() {
                    self.schema.sync(&database).await;
                }

                ExecutionOutcome {
                    success: true,
                    message,
                    row_count,
                    duration_ms,
                    stale,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let entry =
                    HistoryEntry::error(&database, query, executed_at, duration_ms, &message);

                let stale = self
                    .store
                    .commit("query/failure", |state| {
                        state.history.push(entry);
                        if !self.is_current(token) {
                            return true;
                        }
                        state.query = QueryResultState {
                            is_running: false,
                            query: query.to_string(),
                            transaction_kind: Some(kind),
                            execution_time_ms: Some(duration_ms),
                            error_message: Some(message.clone()),
                            log_lines: vec![message.clone()],
                            ..QueryResultState::default()
                        };
                        false
                    })
                    .await;

                warn!(database = %database, kind = %kind, error = %message, stale, "Query failed");

                ExecutionOutcome {
                    success: false,
                    message,
                    row_count: 0,
                    duration_ms,
                    stale,
                }
            }
        }
    }

    fn is_current(&self, token: u64) -> bool {
        self.tokens.load(Ordering::SeqCst) == token
    }
}
