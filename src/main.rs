// Graph Studio: an administration studio for a graph database
//
// This is the main entry point for the Graph Studio application.

use anyhow::{Context, Result};
use graph_studio::cli::Repl;
use graph_studio::clock::SystemClock;
use graph_studio::config::load_config;
use graph_studio::service::{HttpService, MemoryEngine, ModeRouter};
use graph_studio::store::{SnapshotJournal, StudioStore};
use graph_studio::Studio;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
const LOG_ENV: &str = "GRAPH_STUDIO_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config();
    let journal_path = config.resolved_journal_path()?;
    info!(path = %journal_path.display(), "Opening state journal");
    let journal = SnapshotJournal::open(journal_path)
        .await
        .context("Failed to open state journal")?;
    let store = StudioStore::open(journal, config.history_capacity).await?;

    let service = Arc::new(ModeRouter::new(
        Arc::new(MemoryEngine::new()),
        Arc::new(HttpService::new()?),
    ));
    let studio = Arc::new(Studio::new(store, service, &config, Arc::new(SystemClock)).await);
    let _handles = studio.start().await;

    let mut repl = Repl::new(Arc::clone(&studio))?;
    repl.run().await?;

    Ok(())
}
