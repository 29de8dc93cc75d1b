//! CLI command implementations.

pub mod dump_queue;
pub mod inspect;
pub mod maintenance;
pub mod migrate;

use cardsync_core::{CoreError, LocalDatabase, StoreConfig};
use clap::ValueEnum;
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A command needs `--path`.
    #[error("store path required for {0}")]
    MissingPath(&'static str),

    /// The store could not be opened or changed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing store. Pending migrations are applied on open.
pub fn open_store(path: &Path) -> CliResult<LocalDatabase> {
    tracing::debug!(path = %path.display(), "opening store");
    let config = StoreConfig::default().create_if_missing(false);
    let db = LocalDatabase::open(path, config)?;
    if db.last_migration().changed() {
        tracing::info!(
            from = db.last_migration().from_version,
            to = db.last_migration().final_version,
            "migrated store schema"
        );
    }
    Ok(db)
}
