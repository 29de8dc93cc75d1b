//! Dump-queue command implementation.

use super::{open_store, CliResult, Format};
use cardsync_core::{LocalDatabase, OperationStatus, SyncOperation};
use clap::ValueEnum;
use std::path::Path;

/// Status filter accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    /// Waiting to be sent.
    Pending,
    /// Sent and not yet answered.
    InFlight,
    /// Confirmed and not yet purged.
    Confirmed,
    /// Terminally failed.
    Failed,
}

impl From<StatusFilter> for OperationStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => OperationStatus::Pending,
            StatusFilter::InFlight => OperationStatus::InFlight,
            StatusFilter::Confirmed => OperationStatus::Confirmed,
            StatusFilter::Failed => OperationStatus::Failed,
        }
    }
}

/// Runs the dump-queue command.
pub fn run(
    path: &Path,
    status: Option<StatusFilter>,
    limit: Option<usize>,
    format: Format,
) -> CliResult<()> {
    let db = open_store(path)?;
    let ops = collect(&db, status, limit);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&ops)?),
        Format::Text => {
            if ops.is_empty() {
                println!("Queue is empty");
            }
            for op in &ops {
                print_operation(op);
            }
        }
    }
    Ok(())
}

/// Lists queued operations in id order.
pub fn collect(
    db: &LocalDatabase,
    status: Option<StatusFilter>,
    limit: Option<usize>,
) -> Vec<SyncOperation> {
    let ops = match status {
        Some(filter) => db.queue().list_status(filter.into()),
        None => db.queue().list(),
    };
    ops.into_iter().take(limit.unwrap_or(usize::MAX)).collect()
}

fn print_operation(op: &SyncOperation) {
    println!(
        "#{:<6} {:<9} {:<6} {}/{} v{}",
        op.id,
        op.status.as_str(),
        op.kind.as_str(),
        op.entity_type,
        op.entity_id,
        op.client_version
    );
    if op.retry_count > 0 {
        println!("        retries: {}, not before: {} ms", op.retry_count, op.not_before_ms);
    }
    if let Some(error) = &op.last_error {
        println!("        last error: {error}");
    }
}
