//! Local database: entity store plus operation queue.

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::entity::{EntityStore, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::migration::{MigrationContext, MigrationManager, MigrationRunResult};
use crate::queue::OperationQueue;
use crate::repository::Repository;
use cardsync_storage::{InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

#[cfg(feature = "std")]
use crate::dir::StoreDir;
#[cfg(feature = "std")]
use cardsync_storage::FileBackend;
#[cfg(feature = "std")]
use std::path::Path;

/// The on-device store the app reads and writes.
///
/// Opening a database replays both journals, reverts interrupted in-flight
/// operations and applies pending migrations.
///
/// # Example
///
/// ```rust,ignore
/// use cardsync_core::{Flashcard, LocalDatabase, StoreConfig};
///
/// let db = LocalDatabase::open(Path::new("cards"), StoreConfig::default())?;
/// db.repository::<Flashcard>().save(&card)?;
/// assert_eq!(db.queue().stats().pending, 1);
/// ```
pub struct LocalDatabase {
    #[cfg(feature = "std")]
    dir: Option<StoreDir>,
    entities: EntityStore,
    queue: OperationQueue,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    migration: MigrationRunResult,
    write_lock: Mutex<()>,
}

impl LocalDatabase {
    /// Opens or creates a store directory.
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    /// Opens a store directory with a custom clock.
    #[cfg(feature = "std")]
    pub fn open_with_clock(
        path: &Path,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let entities = FileBackend::open(&dir.entities_path())?;
        let queue = FileBackend::open(&dir.queue_path())?;
        let mut db = Self::open_with_backends(Box::new(entities), Box::new(queue), config, clock)?;
        db.dir = Some(dir);
        tracing::info!(
            path = %path.display(),
            schema_version = db.schema_version(),
            "store opened"
        );
        Ok(db)
    }

    /// Opens a throwaway in-memory store.
    pub fn open_in_memory(config: StoreConfig) -> CoreResult<Self> {
        Self::open_with_backends(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            config,
            Arc::new(SystemClock),
        )
    }

    /// Opens a store on explicit backends.
    pub fn open_with_backends(
        entities: Box<dyn StorageBackend>,
        queue: Box<dyn StorageBackend>,
        config: StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let entities = EntityStore::open(entities, &config, Arc::clone(&clock))?;
        let queue = OperationQueue::open(queue, &config, Arc::clone(&clock))?;

        let manager = MigrationManager::builtin();
        let newest = entities.schema_version().max(queue.schema_version());
        if newest > manager.latest_version() {
            return Err(CoreError::UnsupportedSchema {
                found: newest,
                supported: manager.latest_version(),
            });
        }

        // A journal may lag behind if a crash hit between the two rewrites.
        let stored_version = entities.schema_version().min(queue.schema_version());
        let migration = entities.with_records_mut(|records| {
            queue.with_operations_mut(|operations| {
                let mut ctx =
                    MigrationContext::new(records, operations, &config.owner_id, stored_version);
                manager.run_pending(&mut ctx)
            })
        })?;

        if migration.changed() {
            queue.write_snapshot(migration.final_version)?;
            entities.write_snapshot(migration.final_version)?;
            for note in &migration.notes {
                tracing::info!(note = %note, "migration");
            }
        }

        Ok(Self {
            #[cfg(feature = "std")]
            dir: None,
            entities,
            queue,
            config,
            clock,
            migration,
            write_lock: Mutex::new(()),
        })
    }

    /// The entity store.
    #[must_use]
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// The operation queue.
    #[must_use]
    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// A typed repository.
    #[must_use]
    pub fn repository<T: SyncEntity>(&self) -> Repository<'_, T> {
        Repository::new(self)
    }

    /// Serializes a read-enqueue-write sequence on entities.
    ///
    /// Repository writes hold it, and so does the sync engine while it
    /// applies a server result, so neither sees the other half done. Not
    /// reentrant.
    pub fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Schema version of the open store.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.entities.schema_version().min(self.queue.schema_version())
    }

    /// Migrations applied when the store was opened.
    #[must_use]
    pub fn last_migration(&self) -> &MigrationRunResult {
        &self.migration
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The clock used for timestamps and backoff gates.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The store directory, for databases opened from a path.
    #[cfg(feature = "std")]
    #[must_use]
    pub fn store_dir(&self) -> Option<&StoreDir> {
        self.dir.as_ref()
    }

    /// Compacts both journals.
    pub fn compact(&self) -> CoreResult<()> {
        self.queue.compact()?;
        self.entities.compact()
    }
}

impl std::fmt::Debug for LocalDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDatabase")
            .field("entities", &self.entities)
            .field("queue", &self.queue)
            .field("schema_version", &self.schema_version())
            .finish()
    }
}
