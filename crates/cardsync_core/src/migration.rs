//! Schema versioning and migrations.
//!
//! Each journal starts with a schema version record. When a store is opened
//! the [`MigrationManager`] applies every registered migration above the
//! stored version, in order, against the replayed records, and the journals
//! are rewritten with the new version.
//!
//! Migrations are forward-only. A store written by a newer build is refused
//! with [`CoreError::UnsupportedSchema`].
//!
//! ```ignore
//! struct LowercaseLanguages;
//! impl Migration for LowercaseLanguages {
//!     fn version(&self) -> u64 { 3 }
//!     fn name(&self) -> &str { "lowercase_languages" }
//!     fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
//!         for record in ctx.entities_mut().values_mut() { /* ... */ }
//!         Ok(())
//!     }
//! }
//! ```

use crate::entity::EntityRecord;
use crate::error::{CoreError, CoreResult};
use crate::queue::SyncOperation;
use cardsync_sync_protocol::EntityKey;
use std::collections::BTreeMap;

/// Version number for migrations.
pub type MigrationVersion = u64;

/// Highest schema version this build understands.
pub const CURRENT_SCHEMA_VERSION: MigrationVersion = 2;

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version number (unique, sequential).
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// Result of running all pending migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Migrations applied, in order.
    pub applied: Vec<MigrationInfo>,
    /// Version before the run.
    pub from_version: MigrationVersion,
    /// Version after the run.
    pub final_version: MigrationVersion,
    /// Changes reported by the migrations.
    pub notes: Vec<String>,
}

impl MigrationRunResult {
    /// Returns true if at least one migration ran.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.final_version != self.from_version
    }
}

/// State a migration may read and rewrite.
pub struct MigrationContext<'a> {
    entities: &'a mut BTreeMap<EntityKey, EntityRecord>,
    operations: &'a mut BTreeMap<u64, SyncOperation>,
    default_owner: &'a str,
    current_version: MigrationVersion,
    notes: Vec<String>,
}

impl<'a> MigrationContext<'a> {
    /// Creates a context over replayed records.
    pub fn new(
        entities: &'a mut BTreeMap<EntityKey, EntityRecord>,
        operations: &'a mut BTreeMap<u64, SyncOperation>,
        default_owner: &'a str,
        current_version: MigrationVersion,
    ) -> Self {
        Self {
            entities,
            operations,
            default_owner,
            current_version,
            notes: Vec::new(),
        }
    }

    /// Entity records.
    pub fn entities_mut(&mut self) -> &mut BTreeMap<EntityKey, EntityRecord> {
        self.entities
    }

    /// Queued operations.
    pub fn operations_mut(&mut self) -> &mut BTreeMap<u64, SyncOperation> {
        self.operations
    }

    /// Owner configured for the store.
    #[must_use]
    pub fn default_owner(&self) -> &str {
        self.default_owner
    }

    /// Schema version before the running migration.
    #[must_use]
    pub fn current_version(&self) -> MigrationVersion {
        self.current_version
    }

    /// Records a change for the run summary.
    pub fn note(&mut self, description: impl Into<String>) {
        self.notes.push(description.into());
    }
}

/// A schema migration.
pub trait Migration: Send + Sync {
    /// Version this migration upgrades to. Versions start at 1 and have no
    /// gaps.
    fn version(&self) -> MigrationVersion;

    /// Name of this migration.
    fn name(&self) -> &str;

    /// Optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Applies the migration.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()>;
}

/// Version 1: the journal layout itself. Nothing to rewrite.
struct InitialSchema;

impl Migration for InitialSchema {
    fn version(&self) -> MigrationVersion {
        1
    }

    fn name(&self) -> &str {
        "initial_schema"
    }

    fn description(&self) -> Option<&str> {
        Some("entity and queue journals")
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        ctx.note("initialised entity and queue journals");
        Ok(())
    }
}

/// Version 2: every record carries an owner.
struct BackfillEntityOwner;

impl Migration for BackfillEntityOwner {
    fn version(&self) -> MigrationVersion {
        2
    }

    fn name(&self) -> &str {
        "backfill_entity_owner"
    }

    fn description(&self) -> Option<&str> {
        Some("records written without an owner inherit the store's owner")
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        let owner = ctx.default_owner().to_string();
        let mut filled = 0;
        for record in ctx.entities_mut().values_mut() {
            if record.owner_id.is_empty() {
                record.owner_id = owner.clone();
                filled += 1;
            }
        }
        if filled > 0 {
            ctx.note(format!("assigned owner {owner:?} to {filled} records"));
        }
        Ok(())
    }
}

/// Registry of migrations, applied in version order.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl MigrationManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Creates a manager holding the built-in migrations.
    #[must_use]
    pub fn builtin() -> Self {
        let mut migrations: BTreeMap<MigrationVersion, Box<dyn Migration>> = BTreeMap::new();
        migrations.insert(1, Box::new(InitialSchema));
        migrations.insert(2, Box::new(BackfillEntityOwner));
        Self { migrations }
    }

    /// Registers a migration.
    ///
    /// Returns an error if a migration with the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::migration_failed(
                version,
                "version already registered",
            ));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Returns the registered migrations.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info(m.as_ref())).collect()
    }

    /// Returns migrations above `version`.
    #[must_use]
    pub fn pending(&self, version: MigrationVersion) -> Vec<MigrationInfo> {
        self.migrations
            .range(version + 1..)
            .map(|(_, m)| info(m.as_ref()))
            .collect()
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest_version(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Validates that versions start at 1 and have no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = i as u64 + 1;
            if *version != expected {
                return Err(CoreError::migration_failed(
                    *version,
                    format!("version gap: expected {expected}"),
                ));
            }
        }
        Ok(())
    }

    /// Applies every migration above the context's version, stopping at the
    /// first failure.
    pub fn run_pending(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<MigrationRunResult> {
        let from_version = ctx.current_version;
        let latest = self.latest_version();
        if from_version > latest {
            return Err(CoreError::UnsupportedSchema {
                found: from_version,
                supported: latest,
            });
        }
        self.validate()?;

        let mut result = MigrationRunResult {
            from_version,
            final_version: from_version,
            ..MigrationRunResult::default()
        };

        for (version, migration) in self.migrations.range(from_version + 1..) {
            migration
                .up(ctx)
                .map_err(|e| CoreError::migration_failed(*version, e.to_string()))?;
            ctx.current_version = *version;
            result.final_version = *version;
            result.applied.push(info(migration.as_ref()));
            tracing::info!(version, name = migration.name(), "migration applied");
        }

        result.notes = std::mem::take(&mut ctx.notes);
        Ok(result)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::builtin()
    }
}

fn info(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}
