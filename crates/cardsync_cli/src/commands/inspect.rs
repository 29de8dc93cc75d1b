//! Inspect command implementation.

use super::{open_store, CliResult, Format};
use cardsync_core::{LocalDatabase, QueueStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Store path.
    pub path: String,
    /// Schema version after opening.
    pub schema_version: u64,
    /// Schema version found on disk before migrations ran.
    pub stored_schema_version: u64,
    /// Entity journal size in bytes.
    pub entities_size: u64,
    /// Queue journal size in bytes.
    pub queue_size: u64,
    /// Live entities per type.
    pub entities: BTreeMap<String, usize>,
    /// Queued operations per status.
    pub queue: QueueStats,
    /// Earliest backoff gate among waiting operations, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at_ms: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let db = open_store(path)?;
    let report = collect(path, &db);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report),
    }
    Ok(())
}

/// Gathers the report for an open store.
pub fn collect(path: &Path, db: &LocalDatabase) -> InspectReport {
    let (entities_size, queue_size) = db
        .store_dir()
        .map(|dir| (file_size(&dir.entities_path()), file_size(&dir.queue_path())))
        .unwrap_or_default();

    InspectReport {
        path: path.display().to_string(),
        schema_version: db.schema_version(),
        stored_schema_version: db.last_migration().from_version,
        entities_size,
        queue_size,
        entities: db
            .entities()
            .counts()
            .into_iter()
            .map(|(entity_type, count)| (entity_type.as_str().to_string(), count))
            .collect(),
        queue: db.queue().stats(),
        next_retry_at_ms: db.queue().next_retry_at(),
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn print_text_output(report: &InspectReport) {
    println!("CardSync Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", report.path);
    if report.stored_schema_version == report.schema_version {
        println!("Schema version: {}", report.schema_version);
    } else {
        println!(
            "Schema version: {} (migrated from {})",
            report.schema_version, report.stored_schema_version
        );
    }
    println!();
    println!("Storage:");
    println!("  Entity journal: {}", format_size(report.entities_size));
    println!("  Queue journal:  {}", format_size(report.queue_size));
    println!();
    println!("Entities:");
    if report.entities.is_empty() {
        println!("  (none)");
    }
    for (entity_type, count) in &report.entities {
        println!("  {entity_type:<18} {count}");
    }
    println!();
    println!("Queue:");
    println!("  Pending:   {}", report.queue.pending);
    println!("  In flight: {}", report.queue.in_flight);
    println!("  Confirmed: {}", report.queue.confirmed);
    println!("  Failed:    {}", report.queue.failed);
    if let Some(at) = report.next_retry_at_ms {
        println!("  Next retry at: {at} ms");
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_core::{CustomDeck, StoreConfig, CURRENT_SCHEMA_VERSION};
    use tempfile::tempdir;

    #[test]
    fn report_counts_entities_and_queue() {
        let dir = tempdir().unwrap();
        let db = LocalDatabase::open(dir.path(), StoreConfig::default()).unwrap();
        db.repository::<CustomDeck>()
            .save(&CustomDeck {
                id: "d1".into(),
                name: "Verbs".into(),
                description: None,
                language: "fr".into(),
                created_at_ms: 0,
            })
            .unwrap();

        let report = collect(dir.path(), &db);
        assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(report.entities.get("custom_deck"), Some(&1));
        assert_eq!(report.queue.pending, 1);
        assert!(report.entities_size > 0);
        assert!(report.queue_size > 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["queue"]["pending"], 1);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
