//! Error types for Graph Studio
//!
//! This module defines the error types used throughout the studio core.
//! Only user-initiated actions surface these to a caller; background
//! reconciliation records failures in state flags and notifications instead.

use thiserror::Error;

/// Result type alias for Graph Studio
pub type Result<T> = std::result::Result<T, StudioError>;

/// Main error type for Graph Studio
#[derive(Error, Debug)]
pub enum StudioError {
    /// Explicit connect/disconnect failures
    #[error("Connection error: {0}")]
    Connection(String),

    /// Listing databases failed
    #[error("Failed to refresh databases: {0}")]
    CatalogRefresh(String),

    /// A statement was rejected by the engine
    #[error("{0}")]
    QueryExecution(String),

    /// Fetching the schema failed
    #[error("Failed to fetch schema: {0}")]
    SchemaFetch(String),

    /// Schema text could not be tokenized
    #[error("Schema parse error at offset {offset}: {message}")]
    SchemaParse { offset: usize, message: String },

    /// Operation requires a connected session
    #[error("Not connected to a database server")]
    NotConnected,

    /// No active database and no override given
    #[error("No database selected")]
    NoDatabaseSelected,

    /// A newer connect/disconnect was issued while this one was in flight
    #[error("Operation superseded by a newer request")]
    Superseded,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// State journal errors
    #[error("State journal error: {0}")]
    Store(#[from] sqlx::Error),

    /// HTTP-related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote server answered with a non-success status
    #[error("Server error ({status}): {message}")]
    ServerStatus { status: u16, message: String },

    /// Invalid command syntax
    #[error("Invalid syntax for {command}. Expected: {expected}")]
    InvalidCommandSyntax { command: String, expected: String },

    /// Unknown REPL command
    #[error("Unknown command: {0}. Type /help for available commands")]
    UnknownCommand(String),
}

impl StudioError {
    /// Create a connection error from any displayable cause
    pub fn connection(cause: impl std::fmt::Display) -> Self {
        StudioError::Connection(cause.to_string())
    }

    /// Create a query execution error from any displayable cause
    pub fn query(cause: impl std::fmt::Display) -> Self {
        StudioError::QueryExecution(cause.to_string())
    }

    /// Whether this error is a transient transport failure worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            StudioError::Http(e) => e.is_timeout() || e.is_connect(),
            StudioError::ServerStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(StudioError::NoDatabaseSelected.to_string(), "No database selected");
        assert_eq!(
            StudioError::query("[TQL03] syntax error").to_string(),
            "[TQL03] syntax error"
        );
        assert_eq!(
            StudioError::connection("refused").to_string(),
            "Connection error: refused"
        );
    }

    #[test]
    fn test_transient_classification() {
        let busy = StudioError::ServerStatus {
            status: 503,
            message: "busy".to_string(),
        };
        assert!(busy.is_transient());

        let denied = StudioError::ServerStatus {
            status: 401,
            message: "denied".to_string(),
        };
        assert!(!denied.is_transient());
        assert!(!StudioError::NotConnected.is_transient());
    }
}
