//! Connection session
//!
//! The persisted record of the logical connection between the studio and
//! one database engine, plus the controller that owns its transitions.

pub mod controller;
pub mod reconcile;

use crate::service::LiveStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// Re-exports
pub use controller::{SessionController, StartupHandles};
pub use reconcile::{reconcile, Reconciliation, SideEffectPlan};

/// Session connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl SessionStatus {
    /// Whether the controller owns an in-flight transition
    pub fn is_transitional(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Reconnecting)
    }
}

impl From<LiveStatus> for SessionStatus {
    fn from(live: LiveStatus) -> Self {
        match live {
            LiveStatus::Disconnected => SessionStatus::Disconnected,
            LiveStatus::Connecting => SessionStatus::Connecting,
            LiveStatus::Connected => SessionStatus::Connected,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Reconnecting => "reconnecting",
        };
        write!(f, "{}", name)
    }
}

/// Embedded in-process engine or remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Embedded,
    Remote,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Embedded => write!(f, "embedded"),
            ConnectionMode::Remote => write!(f, "remote"),
        }
    }
}

/// Prior session attributes used to reconnect after an engine reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeHint {
    pub saved_server_ref: Option<String>,
    pub active_database: Option<String>,
    pub mode: ConnectionMode,
}

/// The connection session
///
/// `active_database` is only ever set while `status` is `Connected`;
/// `set_status` clears it on every other transition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    status: SessionStatus,
    pub mode: ConnectionMode,
    pub address: Option<String>,
    pub username: Option<String>,
    active_database: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_status_change: Option<DateTime<Utc>>,
    pub saved_server_ref: Option<String>,
    /// Bumped on every status change
    epoch: u64,
}

impl ConnectionSession {
    /// A fresh disconnected session
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn active_database(&self) -> Option<&str> {
        self.active_database.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Move to a new status
    ///
    /// No-op when the status is unchanged.
    pub fn set_status(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.last_status_change = Some(now);
        self.epoch += 1;

        if status == SessionStatus::Connected {
            self.connected_at = Some(now);
        } else {
            self.active_database = None;
            self.connected_at = None;
        }
    }

    /// Select the active database; ignored unless connected
    pub fn set_active_database(&mut self, database: Option<String>) -> bool {
        if database.is_some() && !self.is_connected() {
            return false;
        }
        self.active_database = database;
        true
    }

    /// Capture what is needed to resume this session later
    pub fn resume_hint(&self) -> ResumeHint {
        ResumeHint {
            saved_server_ref: self.saved_server_ref.clone(),
            active_database: self.active_database.clone(),
            mode: self.mode,
        }
    }
}
