//! Query history
//!
//! A bounded, append-only log of executed statements. Reads are newest
//! first; once the capacity is exceeded the oldest entry is evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of entries kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Outcome of an executed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Error,
}

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub database_name: String,
    pub query_text: String,
    pub executed_at: DateTime<Utc>,
    pub status: HistoryStatus,
    pub duration_ms: u64,
    pub row_count: u64,
    pub error_message: Option<String>,
}

impl HistoryEntry {
    /// Entry for a statement that succeeded
    pub fn success(
        database_name: impl Into<String>,
        query_text: impl Into<String>,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
        row_count: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database_name: database_name.into(),
            query_text: query_text.into(),
            executed_at,
            status: HistoryStatus::Success,
            duration_ms,
            row_count,
            error_message: None,
        }
    }

    /// Entry for a statement that failed
    pub fn error(
        database_name: impl Into<String>,
        query_text: impl Into<String>,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database_name: database_name.into(),
            query_text: query_text.into(),
            executed_at,
            status: HistoryStatus::Error,
            duration_ms,
            row_count: 0,
            error_message: Some(error_message.into()),
        }
    }
}

/// Bounded history ordered by `executed_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistory {
    /// Oldest first
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl QueryHistory {
    /// Empty history holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Insert an entry by `executed_at`, returning the evicted one if the
    /// cap was exceeded
    ///
    /// Entries with equal timestamps keep their insertion order.
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        let at = self
            .entries
            .partition_point(|e| e.executed_at <= entry.executed_at);
        self.entries.insert(at, entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Entries, newest first
    pub fn newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the cap, evicting the oldest entries if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(n: i64, start: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry::success("db", format!("match $x isa t{};", n), start + Duration::seconds(n), 1, 0)
    }

    #[test]
    fn test_newest_first() {
        let start = Utc::now();
        let mut history = QueryHistory::new(5);
        history.push(entry(0, start));
        history.push(entry(1, start));

        let order: Vec<_> = history.newest_first().map(|e| e.query_text.as_str()).collect();
        assert_eq!(order, vec!["match $x isa t1;", "match $x isa t0;"]);
    }

    #[test]
    fn test_oldest_entry_is_evicted() {
        let start = Utc::now();
        let mut history = QueryHistory::new(3);
        for n in 0..3 {
            assert!(history.push(entry(n, start)).is_none());
        }
        let evicted = history.push(entry(3, start)).unwrap();

        assert_eq!(evicted.executed_at, start);
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.newest_first().last().unwrap().executed_at,
            start + Duration::seconds(1)
        );
    }

    #[test]
    fn test_late_completion_is_ordered_by_start() {
        let start = Utc::now();
        let mut history = QueryHistory::new(3);
        history.push(entry(1, start));
        history.push(entry(2, start));
        history.push(entry(3, start));

        // Started first, finished last
        let evicted = history.push(entry(0, start)).unwrap();
        assert_eq!(evicted.executed_at, start);
        assert_eq!(history.len(), 3);

        history.push(entry(4, start));
        let order: Vec<_> = history.newest_first().map(|e| e.query_text.as_str()).collect();
        assert_eq!(order, vec!["match $x isa t4;", "match $x isa t3;", "match $x isa t2;"]);

        let mut history = QueryHistory::new(3);
        history.push(entry(2, start));
        history.push(entry(0, start));
        history.push(entry(1, start));
        assert_eq!(history.latest().unwrap().query_text, "match $x isa t2;");
        let order: Vec<_> = history.newest_first().map(|e| e.executed_at).collect();
        assert_eq!(
            order,
            vec![start + Duration::seconds(2), start + Duration::seconds(1), start]
        );
    }

    #[test]
    fn test_clear_and_shrink() {
        let start = Utc::now();
        let mut history = QueryHistory::new(10);
        for n in 0..6 {
            history.push(entry(n, start));
        }
        history.set_capacity(4);
        assert_eq!(history.len(), 4);
        assert_eq!(history.latest().unwrap().executed_at, start + Duration::seconds(5));

        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_error_entry() {
        let e = HistoryEntry::error("db", "match", Utc::now(), 3, "boom");
        assert_eq!(e.status, HistoryStatus::Error);
        assert_eq!(e.row_count, 0);
        assert_eq!(e.error_message.as_deref(), Some("boom"));
    }
}
