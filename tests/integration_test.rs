//! Integration test for Graph Studio
//!
//! Drives the studio facade against a scripted service and the in-memory
//! engine: connection lifecycle, startup reconciliation, catalog backoff,
//! the query pipeline and persistence of the studio snapshot.

use async_trait::async_trait;
use chrono::Utc;
use graph_studio::catalog::{CatalogRefresher, RefreshOutcome};
use graph_studio::clock::{Clock, ManualClock};
use graph_studio::config::Config;
use graph_studio::error::{Result, StudioError};
use graph_studio::history::HistoryStatus;
use graph_studio::notify::NotificationLevel;
use graph_studio::query::kind::TransactionKind;
use graph_studio::schema::{SchemaCatalog, SchemaSynchronizer};
use graph_studio::servers::{default_servers, DemoDefinition, ServerRegistry, SOCIAL_NETWORK_DEMO};
use graph_studio::service::{
    Credentials, DatabaseService, LiveStatus, MemoryEngine, QueryResponse, Row, ServiceEvent,
};
use graph_studio::session::{ConnectionMode, SessionController, SessionStatus};
use graph_studio::store::{SnapshotJournal, StudioState, StudioStore, WorkingContext};
use graph_studio::Studio;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_test::{assert_err, assert_ok};

/// Scripted service with call counters and failure switches
struct FakeService {
    status: Mutex<LiveStatus>,
    events: broadcast::Sender<ServiceEvent>,
    databases: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
    fail_connect: AtomicBool,
    fail_structured: AtomicBool,
    /// Signalled when a query containing `slow` starts
    slow_started: Notify,
    /// Releases a query containing `slow`
    slow_release: Notify,
}

impl FakeService {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            status: Mutex::new(LiveStatus::Disconnected),
            events,
            databases: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            fail_list: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_structured: AtomicBool::new(false),
            slow_started: Notify::new(),
            slow_release: Notify::new(),
        })
    }

    fn set_status(&self, status: LiveStatus) {
        *self.status.lock().unwrap() = status;
        let _ = self.events.send(ServiceEvent::StatusChanged(status));
    }

    /// Connection lost without anyone asking for it
    fn drop_connection(&self) {
        self.set_status(LiveStatus::Disconnected);
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseService for FakeService {
    fn status(&self) -> LiveStatus {
        *self.status.lock().unwrap()
    }

    fn mode(&self) -> Option<ConnectionMode> {
        (self.status() == LiveStatus::Connected).then_some(ConnectionMode::Embedded)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(StudioError::connection("connection refused"));
        }
        self.set_status(LiveStatus::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_status(LiveStatus::Disconnected);
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StudioError::connection("server unreachable"));
        }
        Ok(self.databases.lock().unwrap().clone())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.databases.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn execute_query(
        &self,
        _database: &str,
        query: &str,
        _kind: TransactionKind,
    ) -> Result<QueryResponse> {
        if query.contains("slow") {
            self.slow_started.notify_one();
            self.slow_release.notified().await;
        }
        if query.contains("broken") {
            return Err(StudioError::query("[TQL03] syntax error"));
        }
        if query.trim_start().starts_with("define") {
            return Ok(QueryResponse::Define { success: true });
        }
        let mut row = Row::new();
        row.insert("x".to_string(), json!({ "iid": "0x01", "type": "person" }));
        Ok(QueryResponse::Match { answers: vec![row] })
    }

    async fn schema_text(&self, _database: &str) -> Result<String> {
        Ok("define\n  entity person;\n".to_string())
    }

    async fn structured_schema(&self, _database: &str) -> Result<Option<SchemaCatalog>> {
        if self.fail_structured.load(Ordering::SeqCst) {
            return Err(StudioError::SchemaFetch("introspection timed out".to_string()));
        }
        Ok(None)
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc::now()))
}

async fn studio_with(
    store: StudioStore,
    service: Arc<dyn DatabaseService>,
    clock: Arc<ManualClock>,
) -> Studio {
    Studio::new(store, service, &Config::default(), clock).await
}

async fn fresh_studio(service: Arc<dyn DatabaseService>, clock: Arc<ManualClock>) -> Studio {
    studio_with(StudioStore::new(StudioState::default()), service, clock).await
}

/// Wait until the store satisfies `condition`
async fn wait_for(studio: &Studio, condition: impl Fn(&StudioState) -> bool) {
    let mut revisions = studio.store().subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if studio.store().read(|state| condition(state)).await {
                break;
            }
            revisions.changed().await.unwrap();
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_connect_embedded_selects_database() {
    let service = FakeService::new();
    let studio = fresh_studio(service.clone(), clock()).await;

    assert_ok!(studio.connect_embedded(Some("db1")).await);

    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Connected);
    assert_eq!(state.session.active_database(), Some("db1"));
    assert_eq!(state.session.saved_server_ref.as_deref(), Some("local"));
    assert!(state.catalog.contains("db1"));
    assert!(!state.catalog.is_stale);
    assert_eq!(state.schema.database.as_deref(), Some("db1"));
    assert!(state.schema.entity("person").is_some());
}

#[tokio::test]
async fn test_execute_without_database_is_rejected() {
    let service = FakeService::new();
    let studio = fresh_studio(service, clock()).await;
    assert_ok!(
        studio
            .connect_remote("http://localhost:8000", "admin", "password")
            .await
    );
    assert_eq!(studio.snapshot().await.session.active_database(), None);

    let revision = studio.store().revision();
    let outcome = studio.execute("match $x isa thing;", None).await;

    assert!(!outcome.success);
    assert_eq!(outcome.message, "No database selected");
    assert_eq!(studio.store().revision(), revision);
    let state = studio.snapshot().await;
    assert!(state.history.is_empty());
    assert!(!state.query.is_running);
}

#[tokio::test]
async fn test_define_updates_schema_catalog() {
    let engine = Arc::new(MemoryEngine::new());
    let studio = fresh_studio(engine, clock()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    let outcome = studio
        .execute(
            "define attribute name value string; entity person owns name;",
            None,
        )
        .await;
    assert!(outcome.success, "{}", outcome.message);

    let state = studio.snapshot().await;
    assert_eq!(state.schema.entities.len(), 1);
    let person = state.schema.entity("person").unwrap();
    assert_eq!(person.owned_attributes, vec!["name".to_string()]);
    let name = state.schema.attribute("name").unwrap();
    assert_eq!(name.value_type.as_deref(), Some("string"));
    assert_eq!(state.query.result_kind.as_deref(), Some("define"));
}

#[tokio::test]
async fn test_auto_reconnect_replays_demo_after_reset() {
    let engine = Arc::new(MemoryEngine::new());

    let mut persisted = StudioState::default();
    persisted.session.set_status(SessionStatus::Connected, Utc::now());
    persisted
        .session
        .set_active_database(Some("social-network".to_string()));
    persisted.session.saved_server_ref = Some("demo-social-network".to_string());

    let studio = studio_with(StudioStore::new(persisted), engine, clock()).await;
    let handles = studio.start().await;
    handles
        .reconnect
        .expect("reconnect should be planned")
        .await
        .unwrap();

    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Connected);
    assert_eq!(state.session.active_database(), Some("social-network"));
    assert!(state.catalog.contains("social-network"));
    assert!(state.schema.entity("person").is_some());
    assert!(studio
        .notifications()
        .await
        .iter()
        .any(|n| n.level == NotificationLevel::Success && n.message == "Reconnected to social-network"));

    let people = studio.execute("match $p isa person;", None).await;
    assert!(people.success, "{}", people.message);
    assert_eq!(people.row_count, 3);
}

#[tokio::test]
async fn test_no_auto_reconnect_for_unknown_server() {
    let service = FakeService::new();

    let mut persisted = StudioState::default();
    persisted.session.set_status(SessionStatus::Connected, Utc::now());
    persisted.session.set_active_database(Some("db1".to_string()));
    persisted.session.saved_server_ref = Some("deleted-server".to_string());
    persisted.working_context = Some(WorkingContext {
        lesson_id: Some("intro".to_string()),
        draft_query: None,
    });

    let studio = studio_with(StudioStore::new(persisted), service.clone(), clock()).await;
    let handles = studio.start().await;
    assert!(handles.reconnect.is_none());

    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Disconnected);
    assert_eq!(state.session.active_database(), None);
    assert!(state.working_context.is_none());
    assert!(state.catalog.is_stale);
    assert_eq!(service.list_calls(), 0);
}

#[tokio::test]
async fn test_matching_live_status_keeps_session() {
    let service = FakeService::new();
    service.set_status(LiveStatus::Connected);

    let mut persisted = StudioState::default();
    persisted.session.set_status(SessionStatus::Connected, Utc::now());
    persisted.session.set_active_database(Some("db1".to_string()));
    let epoch = persisted.session.epoch();

    let studio = studio_with(StudioStore::new(persisted), service, clock()).await;
    let handles = studio.start().await;
    assert!(handles.reconnect.is_none());

    let state = studio.snapshot().await;
    assert_eq!(state.session.active_database(), Some("db1"));
    assert_eq!(state.session.epoch(), epoch);
}

#[tokio::test]
async fn test_plain_local_server_reconnects_without_data() {
    let clock = clock();
    let journal = SnapshotJournal::in_memory().await.unwrap();

    let store = StudioStore::open(journal.clone(), 50).await.unwrap();
    let studio = studio_with(store, Arc::new(MemoryEngine::new()), clock.clone()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);
    assert!(studio.execute("define entity person;", None).await.success);
    drop(studio);

    // Reload: the persisted snapshot survives, the engine does not
    let store = StudioStore::open(journal, 50).await.unwrap();
    let restored = store.snapshot().await;
    assert_eq!(restored.session.status(), SessionStatus::Connected);
    assert_eq!(restored.session.active_database(), Some("db1"));
    assert_eq!(restored.history.len(), 1);
    assert!(restored.schema.entity("person").is_some());

    let studio = studio_with(store, Arc::new(MemoryEngine::new()), clock).await;
    studio
        .start()
        .await
        .reconnect
        .expect("reconnect should be planned")
        .await
        .unwrap();

    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Connected);
    assert_eq!(state.session.active_database(), Some("db1"));
    assert!(state.schema.entity("person").is_none());
    assert_eq!(state.history.len(), 1);
}

#[tokio::test]
async fn test_manual_refresh_bypasses_backoff() {
    let service = FakeService::new();
    let clock = clock();
    let studio = fresh_studio(service.clone(), clock.clone()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    service.fail_list.store(true, Ordering::SeqCst);
    let baseline = service.list_calls();

    // 1st failure: retry 1, window 2000 ms
    assert!(matches!(studio.refresh_databases(false).await, RefreshOutcome::Failed(_)));
    let catalog = studio.snapshot().await.catalog;
    assert_eq!(catalog.refresh_retry_count, 1);
    assert_eq!(
        catalog.next_allowed_refresh_at,
        Some(clock_now(&clock) + chrono::Duration::milliseconds(2000))
    );

    // Inside the window nothing is sent
    assert_eq!(studio.refresh_databases(false).await, RefreshOutcome::BackedOff);
    assert_eq!(service.list_calls(), baseline + 1);

    clock.advance(chrono::Duration::milliseconds(2000));
    assert!(matches!(studio.refresh_databases(false).await, RefreshOutcome::Failed(_)));
    clock.advance(chrono::Duration::milliseconds(4000));
    assert!(matches!(studio.refresh_databases(false).await, RefreshOutcome::Failed(_)));

    let catalog = studio.snapshot().await.catalog;
    assert_eq!(catalog.refresh_retry_count, 3);
    assert_eq!(
        catalog.next_allowed_refresh_at,
        Some(clock_now(&clock) + chrono::Duration::milliseconds(8000))
    );
    assert!(catalog.is_stale);
    assert!(catalog.last_error.is_some());
    assert_eq!(service.list_calls(), baseline + 3);

    // Manual retry still reaches the service
    assert!(matches!(studio.refresh_databases(true).await, RefreshOutcome::Failed(_)));
    assert_eq!(service.list_calls(), baseline + 4);

    service.fail_list.store(false, Ordering::SeqCst);
    assert_eq!(studio.refresh_databases(true).await, RefreshOutcome::Refreshed(1));
    let catalog = studio.snapshot().await.catalog;
    assert_eq!(catalog.refresh_retry_count, 0);
    assert_eq!(catalog.next_allowed_refresh_at, None);
    assert!(!catalog.is_stale);
}

fn clock_now(clock: &ManualClock) -> chrono::DateTime<Utc> {
    use graph_studio::clock::Clock;
    clock.now()
}

#[tokio::test]
async fn test_refresh_failure_notification_expires() {
    let service = FakeService::new();
    let clock = clock();
    let studio = fresh_studio(service.clone(), clock.clone()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    service.fail_list.store(true, Ordering::SeqCst);
    studio.refresh_databases(true).await;

    let visible = studio.notifications().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].level, NotificationLevel::Error);
    assert!(visible[0].message.starts_with("Failed to refresh databases"));

    clock.advance(chrono::Duration::milliseconds(4000));
    assert!(studio.notifications().await.is_empty());
}

#[tokio::test]
async fn test_refresh_requires_connection() {
    let service = FakeService::new();
    let studio = fresh_studio(service.clone(), clock()).await;

    assert_eq!(studio.refresh_databases(true).await, RefreshOutcome::NotConnected);
    assert_eq!(service.list_calls(), 0);
}

#[tokio::test]
async fn test_history_keeps_latest_fifty() {
    let service = FakeService::new();
    let studio = fresh_studio(service, clock()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    for i in 0..51 {
        let outcome = studio.execute(&format!("match $x{} isa person;", i), None).await;
        assert!(outcome.success);
    }

    let history = studio.history().await;
    assert_eq!(history.len(), 50);
    assert_eq!(history[0].query_text, "match $x50 isa person;");
    assert_eq!(history[49].query_text, "match $x1 isa person;");
    assert!(history.iter().all(|e| e.database_name == "db1"));
}

#[tokio::test]
async fn test_failed_query_is_recorded() {
    let service = FakeService::new();
    let studio = fresh_studio(service, clock()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    let outcome = studio.execute("match broken", None).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "[TQL03] syntax error");

    let state = studio.snapshot().await;
    assert!(!state.query.is_running);
    assert_eq!(state.query.error_message.as_deref(), Some("[TQL03] syntax error"));
    let latest = state.history.latest().unwrap();
    assert_eq!(latest.status, HistoryStatus::Error);
    assert_eq!(latest.row_count, 0);
}

#[tokio::test]
async fn test_match_projection_round_trip() {
    let engine = Arc::new(MemoryEngine::new());
    let studio = fresh_studio(engine, clock()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    assert!(studio
        .execute("define attribute name value string; entity person, owns name;", None)
        .await
        .success);
    assert!(studio
        .execute(r#"insert $p isa person, has name "Alice";"#, None)
        .await
        .success);

    let outcome = studio
        .execute("match $p isa person, has name $n;", None)
        .await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.row_count, 1);

    let slot = studio.snapshot().await.query;
    assert_eq!(slot.result_count, 1);
    assert_eq!(slot.transaction_kind, Some(TransactionKind::Read));
    assert_eq!(slot.table_rows.len(), 1);
    assert!(slot.table_columns.contains(&"n".to_string()));
    assert!(slot.log_lines.iter().any(|line| line.contains("1 row(s)")));

    let raw: serde_json::Value = serde_json::from_str(slot.raw_json.as_deref().unwrap()).unwrap();
    assert_eq!(raw.as_array().map(Vec::len), Some(1));
    assert!(raw.to_string().contains("Alice"));
}

#[tokio::test]
async fn test_stale_response_never_overwrites_newer_result() {
    let service = FakeService::new();
    let studio = Arc::new(fresh_studio(service.clone(), clock()).await);
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    let slow = {
        let studio = Arc::clone(&studio);
        tokio::spawn(async move { studio.execute("match $slow isa person;", None).await })
    };
    service.slow_started.notified().await;

    let fast = studio.execute("match $fast isa person;", None).await;
    assert!(fast.success);
    assert!(!fast.stale);

    service.slow_release.notify_one();
    let slow = slow.await.unwrap();
    assert!(slow.success);
    assert!(slow.stale);

    let state = studio.snapshot().await;
    assert_eq!(state.query.query, "match $fast isa person;");
    assert!(!state.query.is_running);
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history.latest().unwrap().query_text, "match $slow isa person;");
}

#[tokio::test]
async fn test_live_disconnect_clears_session() {
    let service = FakeService::new();
    let studio = fresh_studio(service.clone(), clock()).await;
    let _handles = studio.start().await;

    assert_ok!(studio.connect_embedded(Some("db1")).await);
    assert!(studio
        .set_working_context(WorkingContext {
            lesson_id: Some("intro".to_string()),
            draft_query: Some("match $x isa person;".to_string()),
        })
        .await);

    service.drop_connection();
    wait_for(&studio, |state| {
        state.session.status() == SessionStatus::Disconnected
    })
    .await;

    let state = studio.snapshot().await;
    assert_eq!(state.session.active_database(), None);
    assert!(state.working_context.is_none());
    assert!(state.catalog.databases.is_empty());
    assert!(state.schema.is_empty());
}

#[tokio::test]
async fn test_failed_connect_leaves_disconnected() {
    let service = FakeService::new();
    service.fail_connect.store(true, Ordering::SeqCst);
    let studio = fresh_studio(service, clock()).await;

    let err = assert_err!(studio.connect_embedded(Some("db1")).await);
    assert!(matches!(err, StudioError::Connection(_)));
    assert_eq!(studio.status().await, SessionStatus::Disconnected);
    assert!(!studio
        .set_working_context(WorkingContext::default())
        .await);
}

#[tokio::test]
async fn test_disconnect_and_select_database() {
    let service = FakeService::new();
    let studio = fresh_studio(service, clock()).await;
    assert_ok!(studio.connect_embedded(Some("db1")).await);

    assert_ok!(studio.create_database("db2").await);
    assert_ok!(studio.select_database("db2").await);
    let state = studio.snapshot().await;
    assert_eq!(state.session.active_database(), Some("db2"));
    assert_eq!(state.catalog.names(), vec!["db1", "db2"]);
    assert_eq!(state.schema.database.as_deref(), Some("db2"));

    assert_ok!(studio.disconnect().await);
    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Disconnected);
    assert!(state.catalog.databases.is_empty());

    assert!(matches!(
        studio.select_database("db1").await,
        Err(StudioError::NotConnected)
    ));
    assert!(matches!(
        studio.create_database("db3").await,
        Err(StudioError::NotConnected)
    ));
}

#[tokio::test]
async fn test_queued_pushes_never_undo_a_newer_connect() {
    let engine = Arc::new(MemoryEngine::new());
    let studio = fresh_studio(engine.clone(), clock()).await;
    let _handles = studio.start().await;

    assert_ok!(studio.connect_embedded(Some("db1")).await);
    assert_ok!(studio.disconnect().await);
    assert_ok!(studio.connect_embedded(Some("db2")).await);

    // Let the listener drain the disconnect and reconnect pushes
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    let state = studio.snapshot().await;
    assert_eq!(engine.status(), LiveStatus::Connected);
    assert_eq!(state.session.status(), SessionStatus::Connected);
    assert_eq!(state.session.active_database(), Some("db2"));
    assert!(state.catalog.contains("db2"));
    assert_eq!(state.schema.database.as_deref(), Some("db2"));
}

#[tokio::test]
async fn test_failed_auto_reconnect_clears_session() {
    let service = FakeService::new();
    service.fail_connect.store(true, Ordering::SeqCst);

    let mut persisted = StudioState::default();
    persisted.session.set_status(SessionStatus::Connected, Utc::now());
    persisted.session.set_active_database(Some("db1".to_string()));
    persisted.session.saved_server_ref = Some("local".to_string());
    persisted.working_context = Some(WorkingContext::default());

    let studio = studio_with(StudioStore::new(persisted), service.clone(), clock()).await;
    studio
        .start()
        .await
        .reconnect
        .expect("reconnect should be planned")
        .await
        .unwrap();

    let state = studio.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Disconnected);
    assert_eq!(state.session.active_database(), None);
    assert!(state.catalog.databases.is_empty());
    assert!(state.catalog.is_stale);
    assert!(state.schema.is_empty());
    assert!(state.working_context.is_none());
    assert_eq!(service.list_calls(), 0);

    let notifications = studio.notifications().await;
    let warning = notifications
        .iter()
        .find(|n| n.level == NotificationLevel::Warning)
        .expect("warning should be pushed");
    assert!(warning.message.starts_with("Could not reconnect"), "{}", warning.message);
}

#[tokio::test]
async fn test_demo_replay_skips_failing_statement() {
    let engine = Arc::new(MemoryEngine::new());
    let clock: Arc<dyn Clock> = clock();
    let service: Arc<dyn DatabaseService> = engine.clone();
    let registry = ServerRegistry::new(default_servers()).with_demo(DemoDefinition {
        id: SOCIAL_NETWORK_DEMO.to_string(),
        name: "Social network".to_string(),
        schema: "define\n  attribute name value string;\n  entity person, owns name;".to_string(),
        sample_data: vec![
            r#"insert $p isa person, has name "Alice";"#.to_string(),
            r#"reinsert $p isa person, has name "Nobody";"#.to_string(),
            r#"insert $p isa person, has name "Bob";"#.to_string(),
        ],
    });

    let mut persisted = StudioState::default();
    persisted.session.set_status(SessionStatus::Connected, Utc::now());
    persisted
        .session
        .set_active_database(Some(SOCIAL_NETWORK_DEMO.to_string()));
    persisted.session.saved_server_ref = Some("demo-social-network".to_string());
    let store = StudioStore::new(persisted);

    let config = Config::default();
    let catalog = CatalogRefresher::new(
        store.clone(),
        Arc::clone(&service),
        Arc::clone(&clock),
        config.backoff(),
    );
    let schema = SchemaSynchronizer::new(store.clone(), Arc::clone(&service), Arc::clone(&clock));
    let controller = Arc::new(SessionController::new(
        store.clone(),
        Arc::clone(&service),
        catalog,
        schema,
        Arc::new(registry),
        clock,
        config.default_database.clone(),
    ));

    controller
        .start()
        .await
        .reconnect
        .expect("reconnect should be planned")
        .await
        .unwrap();

    let state = store.snapshot().await;
    assert_eq!(state.session.status(), SessionStatus::Connected);
    assert_eq!(state.session.active_database(), Some(SOCIAL_NETWORK_DEMO));
    assert!(state.schema.entity("person").is_some());

    let people = assert_ok!(
        engine
            .execute_query(
                SOCIAL_NETWORK_DEMO,
                "match $p isa person;",
                TransactionKind::Read
            )
            .await
    );
    match people {
        QueryResponse::Match { answers } => assert_eq!(answers.len(), 2),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_schema_falls_back_to_text_when_introspection_fails() {
    let service = FakeService::new();
    service.fail_structured.store(true, Ordering::SeqCst);
    let studio = fresh_studio(service, clock()).await;

    assert_ok!(studio.connect_embedded(Some("db1")).await);

    let state = studio.snapshot().await;
    assert_eq!(state.schema.database.as_deref(), Some("db1"));
    assert!(state.schema.entity("person").is_some());
}
