//! Journaled operation queue.
//!
//! Every state change is written to the journal before it becomes visible,
//! so the queue seen after a restart is exactly the queue seen before it,
//! except that operations found in flight go back to pending: their batch
//! may or may not have reached the server, and the server recognises
//! replays by operation id.

use super::operation::{FailOutcome, NewOperation, OperationStatus, QueueStats, SyncOperation};
use crate::clock::Clock;
use crate::codec;
use crate::config::{RetryConfig, StoreConfig};
use crate::error::{CoreError, CoreResult};
use cardsync_storage::{Journal, StorageBackend};
use cardsync_sync_protocol::{EntityKey, EntityType, OperationKind, Payload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted entity id.
const MAX_ENTITY_ID_LEN: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
enum QueueLogRecord {
    Schema { version: u64 },
    NextId { next_id: u64 },
    Upsert(Vec<SyncOperation>),
    Remove(Vec<u64>),
}

struct QueueInner {
    ops: BTreeMap<u64, SyncOperation>,
    next_id: u64,
    journal: Journal,
    schema_version: u64,
}

/// Durable FIFO of local mutations awaiting delivery.
pub struct OperationQueue {
    inner: Mutex<QueueInner>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    max_payload_size: usize,
    compaction_threshold: usize,
}

impl OperationQueue {
    /// Opens the queue on a backend, replaying its journal.
    ///
    /// Operations that were in flight when the queue was last closed are
    /// returned to pending.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let (mut journal, raw) = Journal::open(backend)?;
        journal.set_sync_on_append(config.sync_on_commit);

        let mut ops = BTreeMap::new();
        let mut next_id = 1;
        let mut schema_version = 0;
        for bytes in &raw {
            match codec::decode::<QueueLogRecord>(bytes)? {
                QueueLogRecord::Schema { version } => schema_version = version,
                QueueLogRecord::NextId { next_id: id } => next_id = next_id.max(id),
                QueueLogRecord::Upsert(changed) => {
                    for op in changed {
                        next_id = next_id.max(op.id + 1);
                        ops.insert(op.id, op);
                    }
                }
                QueueLogRecord::Remove(ids) => {
                    for id in ids {
                        next_id = next_id.max(id + 1);
                        ops.remove(&id);
                    }
                }
            }
        }

        let queue = Self {
            inner: Mutex::new(QueueInner {
                ops,
                next_id,
                journal,
                schema_version,
            }),
            clock,
            retry: config.retry.clone(),
            max_payload_size: config.max_payload_size,
            compaction_threshold: config.compaction_threshold,
        };

        let reverted = queue.revert_in_flight()?;
        let stats = queue.stats();
        tracing::debug!(
            pending = stats.pending,
            failed = stats.failed,
            reverted,
            schema_version,
            "operation queue opened"
        );
        Ok(queue)
    }

    /// Validates and appends a new operation.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty or oversized entity id, a missing
    /// payload on a create or update, or a payload above the size limit.
    pub fn enqueue(&self, new: NewOperation) -> CoreResult<SyncOperation> {
        let payload = self.validate(&new)?;
        let now_ms = self.clock.now_millis();

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        let op = SyncOperation {
            id,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            kind: new.kind,
            payload,
            client_version: new.client_version,
            created_at: id,
            enqueued_at_ms: now_ms,
            status: OperationStatus::Pending,
            retry_count: 0,
            not_before_ms: 0,
            last_error: None,
            confirmed_at_ms: None,
            sent: false,
        };

        inner.next_id = id + 1;
        self.commit_upserts(&mut inner, vec![op.clone()])?;
        tracing::trace!(op_id = id, entity = %op.key(), kind = %op.kind, "operation enqueued");
        Ok(op)
    }

    /// Enqueues from untyped input, as received across a language boundary.
    pub fn enqueue_raw(
        &self,
        entity_type: &str,
        entity_id: &str,
        kind: &str,
        payload_json: Option<&str>,
        client_version: u64,
    ) -> CoreResult<SyncOperation> {
        let entity_type: EntityType = entity_type
            .parse()
            .map_err(|e| CoreError::validation(format!("{e}")))?;
        let kind: OperationKind = kind
            .parse()
            .map_err(|e| CoreError::validation(format!("{e}")))?;
        let payload = payload_json
            .map(|json| {
                serde_json::from_str::<serde_json::Value>(json)
                    .map(Payload::new)
                    .map_err(|e| CoreError::validation(format!("payload is not valid JSON: {e}")))
            })
            .transpose()?;

        self.enqueue(NewOperation {
            entity_type,
            entity_id: entity_id.to_string(),
            kind,
            payload,
            client_version,
        })
    }

    /// Takes up to `max_size` eligible operations in enqueue order and marks
    /// them in flight.
    ///
    /// An operation is eligible if it is pending, its backoff has elapsed,
    /// and no other operation on the same entity is in flight or waiting
    /// ahead of it.
    pub fn dequeue_batch(&self, max_size: usize) -> CoreResult<Vec<SyncOperation>> {
        if max_size == 0 {
            return Ok(Vec::new());
        }
        let now_ms = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let mut blocked: HashSet<EntityKey> = inner
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::InFlight)
            .map(SyncOperation::key)
            .collect();

        let mut pending: Vec<&SyncOperation> = inner
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Pending)
            .collect();
        pending.sort_by_key(|op| (op.created_at, op.id));

        let mut batch = Vec::new();
        for op in pending {
            if batch.len() == max_size {
                break;
            }
            let key = op.key();
            if blocked.contains(&key) {
                continue;
            }
            if op.not_before_ms > now_ms {
                blocked.insert(key);
                continue;
            }
            let mut taken = op.clone();
            taken.status = OperationStatus::InFlight;
            batch.push(taken);
        }

        if !batch.is_empty() {
            self.commit_upserts(&mut inner, batch.clone())?;
        }
        Ok(batch)
    }

    /// Marks an in-flight operation as accepted by the server.
    pub fn mark_confirmed(&self, id: u64) -> CoreResult<SyncOperation> {
        let now_ms = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let mut op = Self::expect_status(
            &inner,
            id,
            OperationStatus::InFlight,
            OperationStatus::Confirmed,
        )?;
        op.status = OperationStatus::Confirmed;
        op.confirmed_at_ms = Some(now_ms);
        op.last_error = None;
        self.commit_upserts(&mut inner, vec![op.clone()])?;
        Ok(op)
    }

    /// Records an application error for an in-flight operation.
    ///
    /// The operation goes back to pending behind an exponential backoff, or
    /// becomes failed once the retry limit is reached.
    pub fn mark_failed(&self, id: u64, reason: &str) -> CoreResult<FailOutcome> {
        let now_ms = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let mut op = Self::expect_status(
            &inner,
            id,
            OperationStatus::InFlight,
            OperationStatus::Pending,
        )?;

        op.retry_count = op.retry_count.saturating_add(1);
        op.last_error = Some(reason.to_string());
        let outcome = if self.retry.should_retry(op.retry_count) {
            let delay = self.retry.delay_for_attempt(op.retry_count, op.id);
            op.status = OperationStatus::Pending;
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            op.not_before_ms = now_ms.saturating_add(delay_ms);
            FailOutcome::Retrying {
                retry_count: op.retry_count,
                not_before_ms: op.not_before_ms,
            }
        } else {
            op.status = OperationStatus::Failed;
            FailOutcome::Terminal {
                retry_count: op.retry_count,
            }
        };

        self.commit_upserts(&mut inner, vec![op])?;
        Ok(outcome)
    }

    /// Fails an in-flight operation immediately, without retries.
    pub fn mark_unresolved(&self, id: u64, reason: &str) -> CoreResult<SyncOperation> {
        let mut inner = self.inner.lock();
        let mut op = Self::expect_status(
            &inner,
            id,
            OperationStatus::InFlight,
            OperationStatus::Failed,
        )?;
        op.status = OperationStatus::Failed;
        op.last_error = Some(reason.to_string());
        self.commit_upserts(&mut inner, vec![op.clone()])?;
        Ok(op)
    }

    /// Records that in-flight operations are about to be submitted.
    ///
    /// The flag survives release and revert, so a resend keeps its id and
    /// is never folded into a newer operation.
    pub fn mark_sent(&self, ids: &[u64]) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let mut changed = Vec::with_capacity(ids.len());
        for &id in ids {
            let mut op = Self::expect_status(
                &inner,
                id,
                OperationStatus::InFlight,
                OperationStatus::InFlight,
            )?;
            if !op.sent {
                op.sent = true;
                changed.push(op);
            }
        }
        if changed.is_empty() {
            return Ok(());
        }
        self.commit_upserts(&mut inner, changed)
    }

    /// Returns an in-flight operation to pending without counting a failure.
    pub fn release(&self, id: u64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let mut op = Self::expect_status(
            &inner,
            id,
            OperationStatus::InFlight,
            OperationStatus::Pending,
        )?;
        op.status = OperationStatus::Pending;
        self.commit_upserts(&mut inner, vec![op])
    }

    /// Replaces in-flight operations on one entity by their net effect.
    ///
    /// `net` keeps its id and takes the given kind, payload and version;
    /// every id in `superseded` is marked confirmed. Both changes are one
    /// journal record.
    pub fn supersede(&self, net: &SyncOperation, superseded: &[u64]) -> CoreResult<()> {
        let now_ms = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let mut kept = Self::expect_status(
            &inner,
            net.id,
            OperationStatus::InFlight,
            OperationStatus::InFlight,
        )?;
        kept.kind = net.kind;
        kept.payload = if net.kind.requires_payload() {
            net.payload.clone()
        } else {
            None
        };
        kept.client_version = net.client_version;

        let mut changed = vec![kept];
        for &id in superseded {
            if id == net.id {
                continue;
            }
            let mut op = Self::expect_status(
                &inner,
                id,
                OperationStatus::InFlight,
                OperationStatus::Confirmed,
            )?;
            if !op.targets(&net.key()) {
                return Err(CoreError::validation(format!(
                    "operation {id} targets {} not {}",
                    op.key(),
                    net.key()
                )));
            }
            op.status = OperationStatus::Confirmed;
            op.confirmed_at_ms = Some(now_ms);
            changed.push(op);
        }

        self.commit_upserts(&mut inner, changed)
    }

    /// Points pending operations on `key` at a new server version and,
    /// when the server assigned one, a new entity id.
    ///
    /// Returns the number of operations changed.
    pub fn rebase(
        &self,
        key: &EntityKey,
        canonical_id: Option<&str>,
        version: u64,
    ) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let changed: Vec<SyncOperation> = inner
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Pending && op.targets(key))
            .cloned()
            .map(|mut op| {
                if let Some(id) = canonical_id {
                    op.entity_id = id.to_string();
                    op.payload = op.payload.take().map(|p| p.with_id(id));
                }
                op.client_version = version;
                op
            })
            .collect();

        let count = changed.len();
        if count > 0 {
            self.commit_upserts(&mut inner, changed)?;
        }
        Ok(count)
    }

    /// Returns every in-flight operation to pending.
    pub fn revert_in_flight(&self) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let changed: Vec<SyncOperation> = inner
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::InFlight)
            .cloned()
            .map(|mut op| {
                op.status = OperationStatus::Pending;
                op
            })
            .collect();

        let count = changed.len();
        if count > 0 {
            self.commit_upserts(&mut inner, changed)?;
        }
        Ok(count)
    }

    /// Removes confirmed operations older than `retention`.
    pub fn purge_confirmed(&self, retention: Duration) -> CoreResult<usize> {
        let now_ms = self.clock.now_millis();
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(retention_ms);
        let mut inner = self.inner.lock();

        let ids: Vec<u64> = inner
            .ops
            .values()
            .filter(|op| {
                op.status == OperationStatus::Confirmed
                    && op.confirmed_at_ms.is_some_and(|at| at <= cutoff)
            })
            .map(|op| op.id)
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let bytes = codec::encode(&QueueLogRecord::Remove(ids.clone()))?;
        inner.journal.append(&bytes)?;
        for id in &ids {
            inner.ops.remove(id);
        }
        self.maybe_compact(&mut inner)?;

        tracing::debug!(purged = ids.len(), "confirmed operations purged");
        Ok(ids.len())
    }

    /// Gives failed operations a fresh set of retries.
    pub fn retry_failed(&self) -> CoreResult<usize> {
        let mut inner = self.inner.lock();
        let changed: Vec<SyncOperation> = inner
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Failed)
            .cloned()
            .map(|mut op| {
                op.status = OperationStatus::Pending;
                op.retry_count = 0;
                op.not_before_ms = 0;
                op
            })
            .collect();

        let count = changed.len();
        if count > 0 {
            self.commit_upserts(&mut inner, changed)?;
        }
        Ok(count)
    }

    /// Returns one operation.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<SyncOperation> {
        self.inner.lock().ops.get(&id).cloned()
    }

    /// Returns every operation in id order.
    #[must_use]
    pub fn list(&self) -> Vec<SyncOperation> {
        self.inner.lock().ops.values().cloned().collect()
    }

    /// Returns operations with the given status in id order.
    #[must_use]
    pub fn list_status(&self, status: OperationStatus) -> Vec<SyncOperation> {
        self.inner
            .lock()
            .ops
            .values()
            .filter(|op| op.status == status)
            .cloned()
            .collect()
    }

    /// Returns true if a pending operation targets `key`.
    #[must_use]
    pub fn has_pending(&self, key: &EntityKey) -> bool {
        self.inner
            .lock()
            .ops
            .values()
            .any(|op| op.status == OperationStatus::Pending && op.targets(key))
    }

    /// Earliest backoff gate among pending operations still waiting on one.
    #[must_use]
    pub fn next_retry_at(&self) -> Option<u64> {
        let now_ms = self.clock.now_millis();
        self.inner
            .lock()
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Pending && op.not_before_ms > now_ms)
            .map(|op| op.not_before_ms)
            .min()
    }

    /// Counts operations per status.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for op in inner.ops.values() {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::InFlight => stats.in_flight += 1,
                OperationStatus::Confirmed => stats.confirmed += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Schema version recorded in the journal.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.inner.lock().schema_version
    }

    /// Rewrites the journal as a snapshot of the current queue.
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

    /// Gives a migration direct access to the operations.
    pub(crate) fn with_operations_mut<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<u64, SyncOperation>) -> R,
    ) -> R {
        f(&mut self.inner.lock().ops)
    }

    /// Rewrites the journal stamped with a new schema version.
    pub(crate) fn write_snapshot(&self, schema_version: u64) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        Self::write_snapshot_locked(&mut inner, schema_version)
    }

    fn validate(&self, new: &NewOperation) -> CoreResult<Option<Payload>> {
        let id = new.entity_id.trim();
        if id.is_empty() {
            return Err(CoreError::validation("entity id must not be empty"));
        }
        if id.len() != new.entity_id.len() {
            return Err(CoreError::validation(
                "entity id must not have surrounding whitespace",
            ));
        }
        if id.len() > MAX_ENTITY_ID_LEN {
            return Err(CoreError::validation(format!(
                "entity id longer than {MAX_ENTITY_ID_LEN} bytes"
            )));
        }

        if !new.kind.requires_payload() {
            return Ok(None);
        }
        let payload = new
            .payload
            .clone()
            .ok_or_else(|| CoreError::validation(format!("{} requires a payload", new.kind)))?;
        let size = payload.encoded_len();
        if size > self.max_payload_size {
            return Err(CoreError::validation(format!(
                "payload of {size} bytes exceeds limit of {}",
                self.max_payload_size
            )));
        }
        Ok(Some(payload))
    }

    fn expect_status(
        inner: &QueueInner,
        id: u64,
        expected: OperationStatus,
        to: OperationStatus,
    ) -> CoreResult<SyncOperation> {
        let op = inner
            .ops
            .get(&id)
            .ok_or(CoreError::OperationNotFound(id))?;
        if op.status != expected {
            return Err(CoreError::InvalidTransition {
                id,
                from: op.status,
                to,
            });
        }
        Ok(op.clone())
    }

    fn commit_upserts(&self, inner: &mut QueueInner, ops: Vec<SyncOperation>) -> CoreResult<()> {
        let bytes = codec::encode(&QueueLogRecord::Upsert(ops.clone()))?;
        inner.journal.append(&bytes)?;
        for op in ops {
            inner.ops.insert(op.id, op);
        }
        self.maybe_compact(inner)
    }

    fn maybe_compact(&self, inner: &mut QueueInner) -> CoreResult<()> {
        let count = inner.journal.record_count();
        if count > self.compaction_threshold && count > inner.ops.len() * 2 {
            let version = inner.schema_version;
            Self::write_snapshot_locked(inner, version)?;
        }
        Ok(())
    }

    fn write_snapshot_locked(inner: &mut QueueInner, schema_version: u64) -> CoreResult<()> {
        let schema = codec::encode(&QueueLogRecord::Schema {
            version: schema_version,
        })?;
        let next_id = codec::encode(&QueueLogRecord::NextId {
            next_id: inner.next_id,
        })?;
        let snapshot = codec::encode(&QueueLogRecord::Upsert(
            inner.ops.values().cloned().collect(),
        ))?;
        inner
            .journal
            .rewrite([schema.as_slice(), next_id.as_slice(), snapshot.as_slice()])?;
        inner.schema_version = schema_version;
        tracing::debug!(operations = inner.ops.len(), schema_version, "queue journal compacted");
        Ok(())
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("stats", &self.stats())
            .finish()
    }
}
