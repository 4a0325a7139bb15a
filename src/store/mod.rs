//! Studio store
//!
//! One owned handle to the shared studio state. Every mutation is a
//! labelled commit serialized through a single write lock; subscribers are
//! woken through a revision channel and the durable slices are written to
//! the snapshot journal after each commit.

pub mod journal;
pub mod state;

use crate::error::Result;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};

// Re-exports
pub use journal::SnapshotJournal;
pub use state::{DurableState, StudioState, WorkingContext};

struct Inner {
    state: RwLock<StudioState>,
    revision: watch::Sender<u64>,
    journal: Option<SnapshotJournal>,
    /// Last revision written to the journal
    persisted: Mutex<u64>,
}

/// Shared handle to the studio state
#[derive(Clone)]
pub struct StudioStore {
    inner: Arc<Inner>,
}

impl StudioStore {
    /// In-memory store without persistence
    pub fn new(state: StudioState) -> Self {
        Self::build(state, None, 0)
    }

    /// Store backed by a journal, restored from its last snapshot
    ///
    /// Revisions continue from the restored snapshot's revision.
    pub async fn open(journal: SnapshotJournal, history_capacity: usize) -> Result<Self> {
        let (state, revision) = match journal.load().await {
            Ok(Some((revision, durable))) => {
                debug!(
                    revision,
                    status = %durable.session.status(),
                    history = durable.history.len(),
                    "Restored studio snapshot"
                );
                let mut state = StudioState::from_durable(durable);
                state.history.set_capacity(history_capacity);
                (state, revision)
            }
            Ok(None) => (StudioState::new(history_capacity), 0),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable studio snapshot");
                journal.clear().await?;
                (StudioState::new(history_capacity), 0)
            }
        };

        Ok(Self::build(state, Some(journal), revision))
    }

    fn build(state: StudioState, journal: Option<SnapshotJournal>, revision: u64) -> Self {
        let (sender, _) = watch::channel(revision);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                revision: sender,
                journal,
                persisted: Mutex::new(revision),
            }),
        }
    }

    /// Apply a mutation and publish it
    pub async fn commit<R>(&self, label: &str, f: impl FnOnce(&mut StudioState) -> R) -> R {
        let (result, revision, durable) = {
            let mut state = self.inner.state.write().await;
            let result = f(&mut state);
            let revision = self.bump();
            let durable = self.inner.journal.as_ref().map(|_| state.durable());
            (result, revision, durable)
        };

        debug!(label, revision, "Committed");
        if let Some(durable) = durable {
            self.persist(revision, &durable).await;
        }
        result
    }

    /// Apply a mutation only if `f` decides to
    ///
    /// `f` returning `None` means nothing changed: no revision is published.
    pub async fn try_commit<R>(
        &self,
        label: &str,
        f: impl FnOnce(&mut StudioState) -> Option<R>,
    ) -> Option<R> {
        let (result, revision, durable) = {
            let mut state = self.inner.state.write().await;
            let result = f(&mut state)?;
            let revision = self.bump();
            let durable = self.inner.journal.as_ref().map(|_| state.durable());
            (result, revision, durable)
        };

        debug!(label, revision, "Committed");
        if let Some(durable) = durable {
            self.persist(revision, &durable).await;
        }
        Some(result)
    }

    /// Read from the current state
    pub async fn read<R>(&self, f: impl FnOnce(&StudioState) -> R) -> R {
        let state = self.inner.state.read().await;
        f(&state)
    }

    /// Clone of the whole current state
    pub async fn snapshot(&self) -> StudioState {
        self.inner.state.read().await.clone()
    }

    /// Watch the revision counter; it changes after every commit
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Current revision
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Must be called with the state write lock held
    fn bump(&self) -> u64 {
        let mut next = 0;
        self.inner.revision.send_modify(|revision| {
            *revision += 1;
            next = *revision;
        });
        next
    }

    async fn persist(&self, revision: u64, durable: &DurableState) {
        let Some(journal) = &self.inner.journal else {
            return;
        };

        let mut persisted = self.inner.persisted.lock().await;
        if *persisted >= revision {
            return;
        }
        match journal.save(revision, durable).await {
            Ok(()) => *persisted = revision,
            Err(e) => warn!(revision, error = %e, "Failed to persist studio snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_commit_bumps_revision_and_notifies() {
        let store = StudioStore::new(StudioState::default());
        let mut rx = store.subscribe();

        let epoch = store
            .commit("connect", |state| {
                state.session.set_status(SessionStatus::Connected, Utc::now());
                state.session.epoch()
            })
            .await;

        assert_eq!(epoch, 1);
        assert_eq!(store.revision(), 1);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert!(store.read(|state| state.session.is_connected()).await);
    }

    #[tokio::test]
    async fn test_try_commit_skips_unchanged() {
        let store = StudioStore::new(StudioState::default());
        let result: Option<()> = store.try_commit("noop", |_| None).await;
        assert!(result.is_none());
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn test_durable_slices_survive_reopen() {
        let journal = SnapshotJournal::in_memory().await.unwrap();
        let store = StudioStore::open(journal.clone(), 10).await.unwrap();
        store
            .commit("connect", |state| {
                state.session.set_status(SessionStatus::Connected, Utc::now());
                state.session.set_active_database(Some("db1".to_string()));
                state.query.is_running = true;
            })
            .await;

        let reopened = StudioStore::open(journal.clone(), 10).await.unwrap();
        assert_eq!(reopened.revision(), 1);
        let state = reopened.snapshot().await;
        assert_eq!(state.session.active_database(), Some("db1"));
        assert!(!state.query.is_running);

        // Commits after a reopen keep persisting
        reopened
            .commit("select", |state| {
                state.session.set_active_database(Some("db2".to_string()));
            })
            .await;
        let (revision, durable) = journal.load().await.unwrap().unwrap();
        assert_eq!(revision, 2);
        assert_eq!(durable.session.active_database(), Some("db2"));
    }
}
