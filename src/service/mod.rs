//! Database service boundary
//!
//! This module defines the trait-based abstraction over a graph database
//! engine, enabling the studio core to drive an embedded in-process engine
//! or a remote server through the same interface.

pub mod http;
pub mod memory;
pub mod router;

use crate::error::Result;
use crate::query::kind::TransactionKind;
use crate::schema::model::SchemaCatalog;
use crate::session::ConnectionMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

// Re-exports
pub use http::HttpService;
pub use memory::MemoryEngine;
pub use router::ModeRouter;

/// Connection status as reported by the service itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Push notifications from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// The live connection status changed
    StatusChanged(LiveStatus),
    /// The service switched between embedded and remote mode
    ModeChanged(Option<ConnectionMode>),
}

/// Credentials for `DatabaseService::connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// The in-process engine
    Embedded,
    /// A remote server
    Remote {
        address: String,
        username: String,
        password: String,
    },
}

impl Credentials {
    /// The mode these credentials connect in
    pub fn mode(&self) -> ConnectionMode {
        match self {
            Credentials::Embedded => ConnectionMode::Embedded,
            Credentials::Remote { .. } => ConnectionMode::Remote,
        }
    }
}

/// A row of a query answer or a concept document
pub type Row = Map<String, Value>;

/// Structured response to a single statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryResponse {
    /// `match` answer rows
    Match { answers: Vec<Row> },
    /// `fetch` documents
    Fetch { documents: Vec<Value> },
    /// Concepts created by `insert`
    Insert { inserted: Vec<Row> },
    /// Number of concepts removed by `delete`
    Delete {
        #[serde(rename = "deletedCount")]
        deleted_count: u64,
    },
    /// Schema definition
    Define { success: bool },
    /// Schema removal
    Undefine { success: bool },
    /// Schema replacement
    Redefine { success: bool },
    /// `reduce` result
    Aggregate { value: Value },
}

impl QueryResponse {
    /// Short name of the response kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            QueryResponse::Match { .. } => "match",
            QueryResponse::Fetch { .. } => "fetch",
            QueryResponse::Insert { .. } => "insert",
            QueryResponse::Delete { .. } => "delete",
            QueryResponse::Define { .. } => "define",
            QueryResponse::Undefine { .. } => "undefine",
            QueryResponse::Redefine { .. } => "redefine",
            QueryResponse::Aggregate { .. } => "aggregate",
        }
    }

    /// Whether this response reports a successful schema mutation
    pub fn is_schema_mutation(&self) -> bool {
        matches!(
            self,
            QueryResponse::Define { success: true }
                | QueryResponse::Undefine { success: true }
                | QueryResponse::Redefine { success: true }
        )
    }
}

/// Trait for graph database engines
///
/// Implementations publish their own status transitions through
/// `subscribe`, independently of any caller.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Current live connection status
    fn status(&self) -> LiveStatus;

    /// Current connection mode, if connected
    fn mode(&self) -> Option<ConnectionMode>;

    /// Subscribe to status and mode change events
    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent>;

    /// Open a connection
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()>;

    /// List database names
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Create a database
    async fn create_database(&self, name: &str) -> Result<()>;

    /// Execute one statement against a database
    async fn execute_query(
        &self,
        database: &str,
        query: &str,
        kind: TransactionKind,
    ) -> Result<QueryResponse>;

    /// Textual schema definition of a database
    async fn schema_text(&self, database: &str) -> Result<String>;

    /// Structured schema introspection, when the engine supports it
    async fn structured_schema(&self, _database: &str) -> Result<Option<SchemaCatalog>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_serialization_is_tagged() {
        let response = QueryResponse::Delete { deleted_count: 3 };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "delete");
        assert_eq!(json["deletedCount"], 3);
    }

    #[test]
    fn test_schema_mutation_detection() {
        assert!(QueryResponse::Define { success: true }.is_schema_mutation());
        assert!(!QueryResponse::Define { success: false }.is_schema_mutation());
        assert!(!QueryResponse::Match { answers: vec![] }.is_schema_mutation());
    }

    #[test]
    fn test_credentials_mode() {
        assert_eq!(Credentials::Embedded.mode(), ConnectionMode::Embedded);
        let remote = Credentials::Remote {
            address: "http://localhost:8000".to_string(),
            username: "admin".to_string(),
            password: "password".to_string(),
        };
        assert_eq!(remote.mode(), ConnectionMode::Remote);
    }
}
