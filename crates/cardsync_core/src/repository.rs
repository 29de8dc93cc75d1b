//! Typed access to entities that records every change in the queue.

use crate::database::LocalDatabase;
use crate::entity::{EntityRecord, SyncEntity};
use crate::error::{CoreError, CoreResult};
use crate::queue::{NewOperation, SyncOperation};
use cardsync_sync_protocol::Payload;
use std::marker::PhantomData;

/// Reads and writes one entity type.
///
/// Writes enqueue the matching sync operation before the local record
/// changes, so a crash in between leaves an operation that still carries
/// the full snapshot.
pub struct Repository<'a, T> {
    db: &'a LocalDatabase,
    _marker: PhantomData<T>,
}

impl<'a, T: SyncEntity> Repository<'a, T> {
    pub(crate) fn new(db: &'a LocalDatabase) -> Self {
        Self {
            db,
            _marker: PhantomData,
        }
    }

    /// Returns one entity.
    pub fn get(&self, id: &str) -> CoreResult<Option<T>> {
        self.db
            .entities()
            .get(T::ENTITY_TYPE, id)
            .map(|record| decode(&record))
            .transpose()
    }

    /// Returns every entity of this type, ordered by id.
    pub fn list(&self) -> CoreResult<Vec<T>> {
        self.db
            .entities()
            .list(T::ENTITY_TYPE)
            .iter()
            .map(decode)
            .collect()
    }

    /// Last server version known for an entity (0 if never synced).
    #[must_use]
    pub fn version(&self, id: &str) -> Option<u64> {
        self.db
            .entities()
            .get(T::ENTITY_TYPE, id)
            .map(|record| record.version)
    }

    /// Stores an entity and enqueues a create or update.
    pub fn save(&self, entity: &T) -> CoreResult<SyncOperation> {
        let id = entity.id().to_string();
        let payload = Payload::from_entity(entity)?;
        let owner = entity
            .owner_id()
            .map_or_else(|| self.db.config().owner_id.clone(), str::to_string);

        let _write = self.db.write_lock();
        let existing = self.db.entities().get(T::ENTITY_TYPE, &id);
        let version = existing.as_ref().map_or(0, |record| record.version);
        let new = match existing {
            Some(_) => NewOperation::update(T::ENTITY_TYPE, &id, payload.clone(), version),
            None => NewOperation::create(T::ENTITY_TYPE, &id, payload.clone()),
        };
        let op = self.db.queue().enqueue(new)?;

        self.db.entities().transaction(|txn| {
            let mut record = EntityRecord::new(T::ENTITY_TYPE, &id, payload)
                .with_version(version)
                .with_owner(owner);
            record.updated_at_ms = txn.now_ms();
            txn.put(record);
            Ok(())
        })?;

        tracing::debug!(entity = %op.key(), op_id = op.id, kind = %op.kind, "entity saved");
        Ok(op)
    }

    /// Deletes an entity and enqueues a delete.
    ///
    /// Returns `None` if the entity did not exist locally.
    pub fn remove(&self, id: &str) -> CoreResult<Option<SyncOperation>> {
        let _write = self.db.write_lock();
        let Some(record) = self.db.entities().get(T::ENTITY_TYPE, id) else {
            return Ok(None);
        };

        let op = self
            .db
            .queue()
            .enqueue(NewOperation::delete(T::ENTITY_TYPE, id, record.version))?;
        self.db.entities().delete(T::ENTITY_TYPE, id)?;

        tracing::debug!(entity = %op.key(), op_id = op.id, "entity removed");
        Ok(Some(op))
    }
}

fn decode<T: SyncEntity>(record: &EntityRecord) -> CoreResult<T> {
    record
        .payload
        .to_entity()
        .map_err(|e| CoreError::Decoding(format!("{}: {e}", record.key())))
}
