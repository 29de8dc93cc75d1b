//! Queue and journal maintenance commands.

use super::{open_store, CliResult};
use std::path::Path;
use std::time::Duration;

/// Runs the purge command. Returns the number of operations removed.
pub fn purge(path: &Path, older_than: Duration) -> CliResult<usize> {
    let db = open_store(path)?;
    let removed = db.queue().purge_confirmed(older_than)?;
    println!("Purged {removed} confirmed operation(s)");
    Ok(removed)
}

/// Runs the retry-failed command. Returns the number of operations reset.
pub fn retry_failed(path: &Path) -> CliResult<usize> {
    let db = open_store(path)?;
    let reset = db.queue().retry_failed()?;
    println!("Reset {reset} failed operation(s) to pending");
    Ok(reset)
}

/// Runs the compact command.
pub fn compact(path: &Path) -> CliResult<()> {
    let db = open_store(path)?;
    db.compact()?;
    println!("Compaction complete");
    Ok(())
}
