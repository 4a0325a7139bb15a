//! Snapshot journal
//!
//! Persists the durable slices of the studio state in SQLite so the session,
//! catalog, schema and history survive a restart.

use crate::error::{Result, StudioError};
use crate::store::state::DurableState;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;

/// Row key the studio snapshot is stored under
const SNAPSHOT_KEY: &str = "studio";

/// SQLite-backed snapshot store
#[derive(Debug, Clone)]
pub struct SnapshotJournal {
    pool: SqlitePool,
}

impl SnapshotJournal {
    /// Create or open a journal
    ///
    /// # Arguments
    /// * `path` - Path to the journal database file
    pub async fn open(path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// A journal that lives only as long as the process
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS studio_snapshot (
                key TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                data TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Get the default journal path
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::home_dir()
            .ok_or_else(|| StudioError::Config("Could not determine home directory".to_string()))?;

        path.push(".graph-studio");
        path.push("state.db");

        Ok(path)
    }

    /// Save a snapshot taken at `revision`
    ///
    /// Older revisions never overwrite a newer snapshot.
    pub async fn save(&self, revision: u64, state: &DurableState) -> Result<()> {
        let data = serde_json::to_string(state)?;
        let revision = i64::try_from(revision).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO studio_snapshot (key, revision, data, saved_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(key) DO UPDATE SET
                revision = excluded.revision,
                data = excluded.data,
                saved_at = excluded.saved_at
            WHERE excluded.revision >= studio_snapshot.revision
            "#,
        )
        .bind(SNAPSHOT_KEY)
        .bind(revision)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the latest snapshot and the revision it was saved at
    pub async fn load(&self) -> Result<Option<(u64, DurableState)>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT revision, data FROM studio_snapshot WHERE key = $1")
                .bind(SNAPSHOT_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((revision, data)) => Ok(Some((
                u64::try_from(revision).unwrap_or(0),
                serde_json::from_str(&data)?,
            ))),
            None => Ok(None),
        }
    }

    /// Delete the saved snapshot
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM studio_snapshot")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
