//! Remote server client
//!
//! Talks to a graph database server over its HTTP API, with built-in retry
//! logic and exponential backoff for transient failures. An expired token
//! (401) drops the connection and is published as a status change.

use crate::error::{Result, StudioError};
use crate::query::kind::{stages, TransactionKind};
use crate::service::{Credentials, DatabaseService, LiveStatus, QueryResponse, Row, ServiceEvent};
use crate::session::ConnectionMode;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial retry delay in milliseconds
const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default timeout for HTTP requests (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseList {
    databases: Vec<DatabaseName>,
}

#[derive(Debug, Deserialize)]
struct DatabaseName {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    database_name: &'a str,
    query: &'a str,
    transaction_type: &'a str,
}

/// Raw `/v1/query` answer
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QueryAnswer {
    query_type: Option<String>,
    answer_type: Option<String>,
    answers: Option<Vec<Value>>,
    deleted_count: Option<u64>,
}

#[derive(Debug, Clone)]
struct RemoteSession {
    address: String,
    token: String,
}

/// HTTP client for a remote server
pub struct HttpService {
    client: Client,
    status: Mutex<LiveStatus>,
    session: Mutex<Option<RemoteSession>>,
    events: broadcast::Sender<ServiceEvent>,
    /// Maximum number of retry attempts
    max_retries: u32,
    /// Initial retry delay in milliseconds
    initial_delay_ms: u64,
}

impl HttpService {
    /// Create a new client with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Create a new client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            client,
            status: Mutex::new(LiveStatus::Disconnected),
            session: Mutex::new(None),
            events,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
        })
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay
    pub fn with_retry_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    fn session(&self) -> MutexGuard<'_, Option<RemoteSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: LiveStatus) {
        let changed = {
            let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, status) != status
        };
        if changed {
            let _ = self.events.send(ServiceEvent::StatusChanged(status));
            let mode = (status == LiveStatus::Connected).then_some(ConnectionMode::Remote);
            if status != LiveStatus::Connecting {
                let _ = self.events.send(ServiceEvent::ModeChanged(mode));
            }
        }
    }

    /// Drop the session after the server rejected our token
    fn expire(&self) {
        if self.session().take().is_some() {
            warn!("Remote session expired");
            self.set_status(LiveStatus::Disconnected);
        }
    }

    fn current_session(&self) -> Result<RemoteSession> {
        self.session().clone().ok_or(StudioError::NotConnected)
    }

    /// Send a request with retry logic
    ///
    /// # Returns
    /// Response body as string
    async fn send_with_retry(
        &self,
        method: Method,
        address: &str,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<String> {
        let url = format!("{}{}", address.trim_end_matches('/'), path);
        let mut attempt = 0;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let e = StudioError::from(e);
                    if !e.is_transient() || attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = self.calculate_delay(attempt);
                    debug!(%url, attempt, delay, error = %e, "Retrying request");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }

            // Check if we should retry
            if self.should_retry(status, attempt) {
                let delay = self.calculate_delay(attempt);
                debug!(%url, attempt, delay, status = status.as_u16(), "Retrying request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());

            if status == StatusCode::UNAUTHORIZED && token.is_some() {
                self.expire();
            }

            return Err(StudioError::ServerStatus {
                status: status.as_u16(),
                message,
            });
        }
    }

    /// Check if a request should be retried
    fn should_retry(&self, status: StatusCode, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        // Retry on rate limiting (429)
        if status == StatusCode::TOO_MANY_REQUESTS {
            return true;
        }

        // Retry on server errors (5xx) and timeouts
        status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
    }

    /// Calculate retry delay with exponential backoff
    fn calculate_delay(&self, attempt: u32) -> u64 {
        // Exponential backoff: delay * 2^attempt
        self.initial_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
    }

    async fn authorized(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let session = self.current_session()?;
        self.send_with_retry(method, &session.address, path, Some(&session.token), body)
            .await
    }
}

#[async_trait]
impl DatabaseService for HttpService {
    fn status(&self) -> LiveStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mode(&self) -> Option<ConnectionMode> {
        (self.status() == LiveStatus::Connected).then_some(ConnectionMode::Remote)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let Credentials::Remote {
            address,
            username,
            password,
        } = credentials
        else {
            return Err(StudioError::connection(
                "the remote client needs an address and credentials",
            ));
        };

        self.set_status(LiveStatus::Connecting);
        let body = serde_json::to_value(SignInRequest { username, password })?;
        let signed_in = self
            .send_with_retry(Method::POST, address, "/v1/signin", None, Some(&body))
            .await
            .and_then(|text| Ok(serde_json::from_str::<SignInResponse>(&text)?));

        match signed_in {
            Ok(response) => {
                *self.session() = Some(RemoteSession {
                    address: address.clone(),
                    token: response.token,
                });
                info!(%address, %username, "Signed in to remote server");
                self.set_status(LiveStatus::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_status(LiveStatus::Disconnected);
                Err(StudioError::connection(e))
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.session().take();
        self.set_status(LiveStatus::Disconnected);
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let text = self.authorized(Method::GET, "/v1/databases", None).await?;
        let list: DatabaseList = serde_json::from_str(&text)?;
        Ok(list.databases.into_iter().map(|d| d.name).collect())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let path = format!("/v1/databases/{}", name);
        self.authorized(Method::POST, &path, None).await?;
        Ok(())
    }

    async fn execute_query(
        &self,
        database: &str,
        query: &str,
        kind: TransactionKind,
    ) -> Result<QueryResponse> {
        let body = serde_json::to_value(QueryRequest {
            database_name: database,
            query,
            transaction_type: kind.as_str(),
        })?;

        let text = match self.authorized(Method::POST, "/v1/query", Some(&body)).await {
            Ok(text) => text,
            Err(StudioError::ServerStatus { message, .. }) => return Err(StudioError::query(message)),
            Err(e) => return Err(e),
        };
        let answer: QueryAnswer = serde_json::from_str(&text)?;
        Ok(to_response(query, answer))
    }

    async fn schema_text(&self, database: &str) -> Result<String> {
        let path = format!("/v1/databases/{}/schema", database);
        self.authorized(Method::GET, &path, None).await
    }
}

/// Map a raw answer onto a response by the statement's shape
fn to_response(query: &str, answer: QueryAnswer) -> QueryResponse {
    let stages = stages(query);
    let answers = answer.answers.unwrap_or_default();

    match stages.first().map(String::as_str) {
        Some("define") => return QueryResponse::Define { success: true },
        Some("undefine") => return QueryResponse::Undefine { success: true },
        Some("redefine") => return QueryResponse::Redefine { success: true },
        _ => {}
    }

    let is_documents = answer.answer_type.as_deref() == Some("conceptDocuments");
    match stages.last().map(String::as_str) {
        Some("fetch") => QueryResponse::Fetch { documents: answers },
        _ if is_documents => QueryResponse::Fetch { documents: answers },
        Some("reduce") => QueryResponse::Aggregate {
            value: match answers.as_slice() {
                [single] => single.clone(),
                [] => Value::Null,
                many => json!(many),
            },
        },
        Some("delete") => QueryResponse::Delete {
            deleted_count: answer.deleted_count.unwrap_or(answers.len() as u64),
        },
        Some("insert") | Some("put") | Some("update") => QueryResponse::Insert {
            inserted: answers.into_iter().map(into_row).collect(),
        },
        _ => {
            if answer.query_type.as_deref() == Some("schema") {
                return QueryResponse::Define { success: true };
            }
            QueryResponse::Match {
                answers: answers.into_iter().map(into_row).collect(),
            }
        }
    }
}

/// Unwrap `{ "data": {...} }` rows; wrap scalars under `value`
fn into_row(answer: Value) -> Row {
    match answer {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                map.insert("data".to_string(), other);
                map
            }
            None => map,
        },
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(answers: Vec<Value>) -> QueryAnswer {
        QueryAnswer {
            answers: Some(answers),
            ..QueryAnswer::default()
        }
    }

    #[test]
    fn test_retry_policy() {
        let service = HttpService::new().unwrap();
        assert!(service.should_retry(StatusCode::TOO_MANY_REQUESTS, 0));
        assert!(service.should_retry(StatusCode::BAD_GATEWAY, 2));
        assert!(!service.should_retry(StatusCode::BAD_GATEWAY, 3));
        assert!(!service.should_retry(StatusCode::UNAUTHORIZED, 0));

        assert_eq!(service.calculate_delay(0), 1000);
        assert_eq!(service.calculate_delay(2), 4000);
    }

    #[test]
    fn test_match_rows_are_unwrapped() {
        let response = to_response(
            "match $p isa person;",
            answer(vec![json!({ "data": { "p": { "kind": "entity" } } })]),
        );
        let QueryResponse::Match { answers } = response else {
            panic!("expected match");
        };
        assert_eq!(answers[0]["p"]["kind"], "entity");
    }

    #[test]
    fn test_response_kind_follows_statement() {
        assert_eq!(
            to_response("define entity person;", QueryAnswer::default()),
            QueryResponse::Define { success: true }
        );
        assert_eq!(
            to_response("match $p isa person; delete $p;", answer(vec![json!({}), json!({})])),
            QueryResponse::Delete { deleted_count: 2 }
        );
        assert_eq!(
            to_response("match $p isa person; reduce $c = count;", answer(vec![json!(3)])),
            QueryResponse::Aggregate { value: json!(3) }
        );
        assert!(matches!(
            to_response("match $p isa person; fetch { \"n\": $p.name };", answer(vec![])),
            QueryResponse::Fetch { .. }
        ));
    }

    #[tokio::test]
    async fn test_requests_need_a_session() {
        let service = HttpService::new().unwrap();
        assert!(matches!(
            service.list_databases().await,
            Err(StudioError::NotConnected)
        ));
        assert!(service
            .connect(&Credentials::Embedded)
            .await
            .is_err());
    }
}
