//! Migrate command implementation.

use super::{open_store, CliResult, Format};
use cardsync_core::MigrationRunResult;
use serde::Serialize;
use std::path::Path;

/// Outcome of opening a store with migrations.
#[derive(Debug, Serialize)]
pub struct MigrateReport {
    /// Schema version found on disk.
    pub from_version: u64,
    /// Schema version after the run.
    pub final_version: u64,
    /// Names of the applied migrations, in order.
    pub applied: Vec<String>,
    /// Changes the migrations reported.
    pub notes: Vec<String>,
}

impl From<&MigrationRunResult> for MigrateReport {
    fn from(run: &MigrationRunResult) -> Self {
        Self {
            from_version: run.from_version,
            final_version: run.final_version,
            applied: run
                .applied
                .iter()
                .map(|m| format!("v{}: {}", m.version, m.name))
                .collect(),
            notes: run.notes.clone(),
        }
    }
}

/// Runs the migrate command.
///
/// Opening a store applies pending migrations, so this reports what the
/// open did.
pub fn run(path: &Path, format: Format) -> CliResult<MigrateReport> {
    let db = open_store(path)?;
    let report = MigrateReport::from(db.last_migration());

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            if report.applied.is_empty() {
                println!("Schema is up to date (version {})", report.final_version);
            } else {
                println!(
                    "Migrated schema {} -> {}",
                    report.from_version, report.final_version
                );
                for name in &report.applied {
                    println!("  applied {name}");
                }
                for note in &report.notes {
                    println!("  - {note}");
                }
            }
        }
    }
    Ok(report)
}
