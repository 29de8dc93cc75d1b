//! Journaled entity store.
//!
//! Every commit is a single journal record holding all of its puts and
//! deletes, so a transaction is either fully replayed on restart or not at
//! all. The in-memory map is only updated after the record is written.

use super::EntityRecord;
use crate::clock::Clock;
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use cardsync_storage::{Journal, StorageBackend};
use cardsync_sync_protocol::{EntityKey, EntityType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
enum EntityLogRecord {
    Schema {
        version: u64,
    },
    Commit {
        puts: Vec<EntityRecord>,
        deletes: Vec<EntityKey>,
    },
}

struct EntityInner {
    records: BTreeMap<EntityKey, EntityRecord>,
    journal: Journal,
    schema_version: u64,
}

/// Local copies of every entity, keyed by type and id.
pub struct EntityStore {
    inner: Mutex<EntityInner>,
    clock: Arc<dyn Clock>,
    owner_id: String,
    compaction_threshold: usize,
}

impl EntityStore {
    /// Opens the store on a backend, replaying its journal.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let (mut journal, raw) = Journal::open(backend)?;
        journal.set_sync_on_append(config.sync_on_commit);

        let mut records = BTreeMap::new();
        let mut schema_version = 0;
        for bytes in &raw {
            match codec::decode::<EntityLogRecord>(bytes)? {
                EntityLogRecord::Schema { version } => schema_version = version,
                EntityLogRecord::Commit { puts, deletes } => {
                    for key in deletes {
                        records.remove(&key);
                    }
                    for record in puts {
                        records.insert(record.key(), record);
                    }
                }
            }
        }

        tracing::debug!(
            entities = records.len(),
            schema_version,
            journal = %journal.describe(),
            "entity store opened"
        );

        Ok(Self {
            inner: Mutex::new(EntityInner {
                records,
                journal,
                schema_version,
            }),
            clock,
            owner_id: config.owner_id.clone(),
            compaction_threshold: config.compaction_threshold,
        })
    }

    /// Returns one record.
    #[must_use]
    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<EntityRecord> {
        self.get_key(&EntityKey::new(entity_type, id))
    }

    /// Returns one record by key.
    #[must_use]
    pub fn get_key(&self, key: &EntityKey) -> Option<EntityRecord> {
        self.inner.lock().records.get(key).cloned()
    }

    /// Returns every record of a type, ordered by id.
    #[must_use]
    pub fn list(&self, entity_type: EntityType) -> Vec<EntityRecord> {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| r.entity_type == entity_type)
            .cloned()
            .collect()
    }

    /// Number of records of every type.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts records per type.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<EntityType, usize> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        for key in inner.records.keys() {
            *counts.entry(key.entity_type).or_insert(0) += 1;
        }
        counts
    }

    /// Schema version recorded in the journal.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.inner.lock().schema_version
    }

    /// Writes a single record.
    pub fn put(&self, record: EntityRecord) -> CoreResult<()> {
        self.transaction(|txn| {
            txn.put(record);
            Ok(())
        })
    }

    /// Deletes a record, returning whether it existed.
    pub fn delete(&self, entity_type: EntityType, id: &str) -> CoreResult<bool> {
        let key = EntityKey::new(entity_type, id);
        self.transaction(|txn| Ok(txn.delete(&key)))
    }

    /// Runs `f` against a staged view and commits its writes atomically.
    ///
    /// If `f` returns an error nothing is written. The store is locked for
    /// the duration of `f`, so `f` must not call back into the store.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> CoreResult<T>,
    {
        let mut inner = self.inner.lock();
        let now_ms = self.clock.now_millis();

        let (value, staged) = {
            let mut txn = StoreTransaction {
                records: &inner.records,
                staged: BTreeMap::new(),
                owner_id: &self.owner_id,
                now_ms,
            };
            let value = f(&mut txn)?;
            (value, txn.staged)
        };

        if staged.is_empty() {
            return Ok(value);
        }

        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for (key, change) in staged {
            match change {
                Some(record) => puts.push(record),
                None => deletes.push(key),
            }
        }

        let bytes = codec::encode(&EntityLogRecord::Commit {
            puts: puts.clone(),
            deletes: deletes.clone(),
        })?;
        inner.journal.append(&bytes)?;

        for key in &deletes {
            inner.records.remove(key);
        }
        for record in puts {
            inner.records.insert(record.key(), record);
        }

        self.maybe_compact(&mut inner)?;
        Ok(value)
    }

    /// Rewrites the journal as a snapshot of the current records.
    pub fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let version = inner.schema_version;
        Self::write_snapshot_locked(&mut inner, version)
    }

    /// Describes the backing storage.
    #[must_use]
    pub fn describe(&self) -> String {
        self.inner.lock().journal.describe()
    }

    /// Gives a migration direct access to the records.
    pub(crate) fn with_records_mut<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<EntityKey, EntityRecord>) -> R,
    ) -> R {
        f(&mut self.inner.lock().records)
    }

    /// Rewrites the journal stamped with a new schema version.
    pub(crate) fn write_snapshot(&self, schema_version: u64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::write_snapshot_locked(&mut inner, schema_version)
    }

    fn maybe_compact(&self, inner: &mut EntityInner) -> CoreResult<()> {
        let count = inner.journal.record_count();
        if count > self.compaction_threshold && count > inner.records.len() * 2 {
            let version = inner.schema_version;
            Self::write_snapshot_locked(inner, version)?;
        }
        Ok(())
    }

    fn write_snapshot_locked(inner: &mut EntityInner, schema_version: u64) -> CoreResult<()> {
        let schema = codec::encode(&EntityLogRecord::Schema {
            version: schema_version,
        })?;
        let snapshot = codec::encode(&EntityLogRecord::Commit {
            puts: inner.records.values().cloned().collect(),
            deletes: Vec::new(),
        })?;
        inner
            .journal
            .rewrite([schema.as_slice(), snapshot.as_slice()])?;
        inner.schema_version = schema_version;
        tracing::debug!(
            entities = inner.records.len(),
            schema_version,
            "entity journal compacted"
        );
        Ok(())
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.len())
            .finish()
    }
}

/// Staged writes of one [`EntityStore::transaction`].
///
/// Reads see the transaction's own writes.
pub struct StoreTransaction<'a> {
    records: &'a BTreeMap<EntityKey, EntityRecord>,
    staged: BTreeMap<EntityKey, Option<EntityRecord>>,
    owner_id: &'a str,
    now_ms: u64,
}

impl StoreTransaction<'_> {
    /// Reads a record.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        match self.staged.get(key) {
            Some(change) => change.clone(),
            None => self.records.get(key).cloned(),
        }
    }

    /// Stages a write. Records without an owner get the store's owner.
    pub fn put(&mut self, mut record: EntityRecord) {
        if record.owner_id.is_empty() {
            record.owner_id = self.owner_id.to_string();
        }
        if record.updated_at_ms == 0 {
            record.updated_at_ms = self.now_ms;
        }
        self.staged.insert(record.key(), Some(record));
    }

    /// Stages a delete, returning whether the record existed.
    pub fn delete(&mut self, key: &EntityKey) -> bool {
        let existed = self.get(key).is_some();
        self.staged.insert(key.clone(), None);
        existed
    }

    /// Moves a record to a server-assigned id.
    pub fn rename(&mut self, key: &EntityKey, new_id: &str) -> CoreResult<()> {
        if key.entity_id == new_id {
            return Ok(());
        }
        let mut record = self
            .get(key)
            .ok_or_else(|| CoreError::EntityNotFound(key.clone()))?;
        record.rekey(new_id);
        self.staged.insert(key.clone(), None);
        self.staged.insert(record.key(), Some(record));
        Ok(())
    }

    /// Time the transaction started, epoch milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }
}
