//! Notifications
//!
//! Fire-and-forget toasts. Expiry is computed from timestamps when the list
//! is read, so no timers are involved. Error notifications stay until
//! dismissed unless raised as transient.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default auto-dismiss delay
pub const DEFAULT_NOTIFICATION_TTL_MS: u64 = 4000;

/// Keep at most this many notifications around
const MAX_NOTIFICATIONS: usize = 20;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// A single notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub level: NotificationLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// `None` means sticky
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Whether the notification is still showing at `now`
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now < expires)
    }
}

/// The notification list
#[derive(Debug, Clone, PartialEq)]
pub struct Notifications {
    ttl: Duration,
    items: Vec<Notification>,
}

impl Notifications {
    /// Empty list with the given auto-dismiss delay
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl: Duration::milliseconds(ttl_ms.min(i64::MAX as u64) as i64),
            items: Vec::new(),
        }
    }

    /// Change the auto-dismiss delay for future notifications
    pub fn set_ttl(&mut self, ttl_ms: u64) {
        self.ttl = Duration::milliseconds(ttl_ms.min(i64::MAX as u64) as i64);
    }

    /// Raise a notification; errors are sticky
    pub fn push(&mut self, level: NotificationLevel, message: impl Into<String>, now: DateTime<Utc>) -> Uuid {
        let expires_at = match level {
            NotificationLevel::Error => None,
            _ => Some(now + self.ttl),
        };
        self.insert(level, message.into(), now, expires_at)
    }

    /// Raise a notification that always auto-dismisses
    pub fn push_transient(
        &mut self,
        level: NotificationLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Uuid {
        let expires_at = Some(now + self.ttl);
        self.insert(level, message.into(), now, expires_at)
    }

    fn insert(
        &mut self,
        level: NotificationLevel,
        message: String,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        self.items.retain(|n| n.is_visible(now));
        if self.items.len() >= MAX_NOTIFICATIONS {
            self.items.remove(0);
        }
        let id = Uuid::new_v4();
        self.items.push(Notification {
            id,
            level,
            message,
            created_at: now,
            expires_at,
        });
        id
    }

    /// Notifications showing at `now`, oldest first
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.items.iter().filter(|n| n.is_visible(now)).cloned().collect()
    }

    /// Dismiss a notification; false if unknown
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        self.items.len() != before
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_TTL_MS)
    }
}
