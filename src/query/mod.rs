//! Query execution
//!
//! Classifies statements, runs them against the active database and keeps
//! the single result slot the presentation layer renders.

pub mod kind;
pub mod pipeline;
pub mod projection;

use serde::{Deserialize, Serialize};

// Re-exports
pub use kind::{classify, TransactionKind};
pub use pipeline::QueryPipeline;
pub use projection::Projection;

/// The shared result slot
///
/// Exactly one exists; every execution overwrites it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultState {
    pub is_running: bool,
    pub query: String,
    pub transaction_kind: Option<TransactionKind>,
    pub execution_time_ms: Option<u64>,
    pub error_message: Option<String>,
    /// Response kind, e.g. `match` or `define`
    pub result_kind: Option<String>,
    pub result_count: u64,
    pub raw_json: Option<String>,
    pub log_lines: Vec<String>,
    pub table_columns: Vec<String>,
    pub table_rows: Vec<Vec<String>>,
}

impl QueryResultState {
    /// A slot for a statement that just started running
    pub fn running(query: &str, kind: TransactionKind) -> Self {
        Self {
            is_running: true,
            query: query.to_string(),
            transaction_kind: Some(kind),
            ..Self::default()
        }
    }
}

/// What `QueryPipeline::execute` reports to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Summary line on success, error text on failure
    pub message: String,
    pub row_count: u64,
    pub duration_ms: u64,
    /// A newer execution owned the result slot when this one finished
    pub stale: bool,
}

impl ExecutionOutcome {
    /// Rejected before reaching the engine
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            row_count: 0,
            duration_ms: 0,
            stale: false,
        }
    }
}
