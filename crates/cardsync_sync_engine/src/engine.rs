//! The drain cycle.
//!
//! One cycle dequeues a batch, coalesces it per entity, submits it in a
//! single request and applies the per-operation results:
//!
//! - accepted: the local record takes the server version (and id), the
//!   operation is confirmed and pending work on the entity is rebased;
//! - rejected with server state: the conflict policy decides, and a
//!   follow-up update is queued when the resolved state differs from the
//!   server's;
//! - error: the operation backs off, or fails for good after the retry limit.
//!
//! Losing the connection pauses the engine without penalising anything.

use crate::coalesce::coalesce;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::observer::{NoopObserver, SyncObserver};
use crate::transport::SyncTransport;
use cardsync_core::{
    CoreError, EntityRecord, FailOutcome, LocalDatabase, NewOperation, QueueStats, SyncOperation,
};
use cardsync_sync_protocol::{
    BatchRequest, ConflictData, ConflictPolicy, ConflictSide, OperationKind, OperationResult,
    ResultStatus,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// A cycle is running.
    Draining,
    /// The last cycle found the server unreachable.
    Offline,
    /// The last cycle finished without failures.
    Synced,
    /// The last cycle had failures or errored.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Draining)
    }
}

/// Cumulative statistics across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles completed.
    pub cycles_completed: u64,
    /// Net operations sent.
    pub operations_submitted: u64,
    /// Operations accepted by the server.
    pub operations_confirmed: u64,
    /// Operations folded into a later one.
    pub operations_superseded: u64,
    /// Conflicts settled by the policy.
    pub conflicts_resolved: u64,
    /// Conflicts left to the caller.
    pub conflicts_unresolved: u64,
    /// Backoff retries scheduled.
    pub retries_scheduled: u64,
    /// Operations that failed for good.
    pub terminal_failures: u64,
    /// Cycles that found the server unreachable.
    pub pauses: u64,
    /// Last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one drain cycle, or of several added together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    /// Net operations sent.
    pub submitted: usize,
    /// Operations accepted.
    pub confirmed: usize,
    /// Operations folded into a net operation.
    pub superseded: usize,
    /// Conflicts settled by the policy.
    pub conflicts_resolved: usize,
    /// Conflicts left to the caller.
    pub unresolved: usize,
    /// Operations scheduled for another attempt.
    pub retrying: usize,
    /// Operations that failed for good.
    pub failed: usize,
    /// Confirmed operations purged after the cycle.
    pub purged: usize,
    /// The server was unreachable.
    pub paused: bool,
    /// Wall time spent.
    pub duration: Duration,
}

impl DrainSummary {
    /// Adds another summary into this one.
    pub fn merge(&mut self, other: &DrainSummary) {
        self.submitted += other.submitted;
        self.confirmed += other.confirmed;
        self.superseded += other.superseded;
        self.conflicts_resolved += other.conflicts_resolved;
        self.unresolved += other.unresolved;
        self.retrying += other.retrying;
        self.failed += other.failed;
        self.purged += other.purged;
        self.paused |= other.paused;
        self.duration += other.duration;
    }

    /// Returns true if some operation changed state.
    pub fn progressed(&self) -> bool {
        self.confirmed
            + self.superseded
            + self.conflicts_resolved
            + self.unresolved
            + self.retrying
            + self.failed
            > 0
    }

    /// Returns true if nothing failed or was left unresolved.
    pub fn is_clean(&self) -> bool {
        !self.paused && self.retrying == 0 && self.failed == 0 && self.unresolved == 0
    }
}

/// How the most recent cycle ended, for callers that waited on it.
#[derive(Debug, Clone)]
enum CycleOutcome {
    Finished(DrainSummary),
    Cancelled,
    Failed(String),
}

/// Drains the operation queue to the server.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    db: Arc<LocalDatabase>,
    transport: Arc<T>,
    policy: RwLock<ConflictPolicy>,
    observer: RwLock<Arc<dyn SyncObserver>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    drain_lock: Mutex<()>,
    last_outcome: Mutex<Option<CycleOutcome>>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, db: Arc<LocalDatabase>, transport: T) -> Self {
        Self {
            config,
            db,
            transport: Arc::new(transport),
            policy: RwLock::new(ConflictPolicy::default()),
            observer: RwLock::new(Arc::new(NoopObserver)),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            drain_lock: Mutex::new(()),
            last_outcome: Mutex::new(None),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Counts queued operations per status.
    pub fn queue_stats(&self) -> QueueStats {
        self.db.queue().stats()
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The local database.
    pub fn database(&self) -> &Arc<LocalDatabase> {
        &self.db
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sets the conflict policy.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.policy.write() = policy;
    }

    /// Gets the conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.policy.read().clone()
    }

    /// Sets the observer.
    pub fn set_observer(&self, observer: Arc<dyn SyncObserver>) {
        *self.observer.write() = observer;
    }

    /// Enqueues an operation, reporting bad input as `Validation`.
    pub fn enqueue(&self, new: NewOperation) -> SyncResult<SyncOperation> {
        self.db.queue().enqueue(new).map_err(|e| match e {
            CoreError::Validation(message) => SyncError::Validation(message),
            other => SyncError::Core(other),
        })
    }

    /// Cancels the running cycle.
    ///
    /// The response of an in-flight submission is discarded and its
    /// operations go back to pending without a penalty.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if a cancel was requested since the last cycle started.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn observer(&self) -> Arc<dyn SyncObserver> {
        Arc::clone(&*self.observer.read())
    }

    /// Runs one drain cycle.
    ///
    /// If a cycle is already running this waits for it and returns its
    /// outcome instead of starting another one: the same summary, or
    /// `Cancelled`, or `Joined` with the error message.
    pub fn drain(&self) -> SyncResult<DrainSummary> {
        let _guard = match self.drain_lock.try_lock() {
            Some(guard) => guard,
            None => {
                let _running = self.drain_lock.lock();
                tracing::debug!("joined running drain cycle");
                return match self.last_outcome.lock().clone() {
                    None => Ok(DrainSummary::default()),
                    Some(CycleOutcome::Finished(summary)) => Ok(summary),
                    Some(CycleOutcome::Cancelled) => Err(SyncError::Cancelled),
                    Some(CycleOutcome::Failed(message)) => Err(SyncError::Joined(message)),
                };
            }
        };

        self.cancelled.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Draining);
        let start = Instant::now();

        match self.run_cycle() {
            Ok(mut summary) => {
                summary.duration = start.elapsed();
                self.finish(&summary);
                Ok(summary)
            }
            Err(error) => {
                if let Err(revert) = self.db.queue().revert_in_flight() {
                    tracing::error!(error = %revert, "failed to revert in-flight operations");
                }
                let outcome = if matches!(error, SyncError::Cancelled) {
                    tracing::info!("drain cycle cancelled");
                    self.set_state(SyncState::Idle);
                    CycleOutcome::Cancelled
                } else {
                    tracing::error!(error = %error, "drain cycle failed");
                    self.set_state(SyncState::Error);
                    CycleOutcome::Failed(error.to_string())
                };
                self.stats.write().last_error = Some(error.to_string());
                *self.last_outcome.lock() = Some(outcome);
                Err(error)
            }
        }
    }

    /// Runs cycles until nothing is eligible, the server is unreachable or
    /// a cycle makes no progress.
    pub fn drain_all(&self) -> SyncResult<DrainSummary> {
        let mut total = DrainSummary::default();
        for _ in 0..self.config.max_cycles.max(1) {
            let summary = self.drain()?;
            total.merge(&summary);
            if summary.paused || summary.submitted == 0 || !summary.progressed() {
                break;
            }
        }
        Ok(total)
    }

    fn run_cycle(&self) -> SyncResult<DrainSummary> {
        let queue = self.db.queue();
        let mut summary = DrainSummary::default();

        if !self.transport.is_connected() {
            summary.paused = true;
            return Ok(summary);
        }

        let batch = queue.dequeue_batch(self.config.batch_size)?;
        if batch.is_empty() {
            summary.purged = queue.purge_confirmed(self.config.confirmed_retention)?;
            return Ok(summary);
        }

        let mut outgoing = Vec::new();
        let mut deferred = 0;
        for group in coalesce(batch) {
            if !group.superseded.is_empty() {
                queue.supersede(&group.net, &group.superseded)?;
                summary.superseded += group.superseded.len();
            }
            for &id in &group.deferred {
                queue.release(id)?;
            }
            deferred += group.deferred.len();
            outgoing.push(group.net);
        }

        let request = BatchRequest::new(
            self.config.user_id.clone(),
            self.config.device_id.clone(),
            outgoing.iter().map(SyncOperation::to_wire).collect(),
        );
        self.check_cancelled()?;

        let ids: Vec<u64> = outgoing.iter().map(|op| op.id).collect();
        queue.mark_sent(&ids)?;

        summary.submitted = outgoing.len();
        tracing::debug!(
            operations = outgoing.len(),
            superseded = summary.superseded,
            deferred,
            "submitting batch"
        );
        let outcome = self
            .transport
            .submit_batch(&request, self.config.request_timeout);
        self.check_cancelled()?;

        match outcome {
            Ok(response) if response.results.len() == outgoing.len() => {
                for (op, result) in outgoing.iter().zip(response.results) {
                    self.apply_result(op, result, &mut summary)?;
                }
            }
            Ok(response) => {
                let reason = format!(
                    "server answered {} results for {} operations",
                    response.results.len(),
                    outgoing.len()
                );
                for op in &outgoing {
                    self.record_failure(op, &reason, &mut summary)?;
                }
            }
            Err(error) if error.is_connectivity() => {
                tracing::warn!(error = %error, "server unreachable, pausing");
                queue.revert_in_flight()?;
                summary.paused = true;
                return Ok(summary);
            }
            Err(
                error @ (SyncError::Timeout | SyncError::Application(_) | SyncError::Protocol(_)),
            ) => {
                let reason = error.to_string();
                for op in &outgoing {
                    self.record_failure(op, &reason, &mut summary)?;
                }
            }
            Err(error) => return Err(error),
        }

        summary.purged = queue.purge_confirmed(self.config.confirmed_retention)?;
        Ok(summary)
    }

    fn finish(&self, summary: &DrainSummary) {
        let state = if summary.paused {
            SyncState::Offline
        } else if summary.is_clean() {
            SyncState::Synced
        } else {
            SyncState::Error
        };
        self.set_state(state);

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.operations_submitted += summary.submitted as u64;
            stats.operations_confirmed += summary.confirmed as u64;
            stats.operations_superseded += summary.superseded as u64;
            stats.conflicts_resolved += summary.conflicts_resolved as u64;
            stats.conflicts_unresolved += summary.unresolved as u64;
            stats.retries_scheduled += summary.retrying as u64;
            stats.terminal_failures += summary.failed as u64;
            if summary.paused {
                stats.pauses += 1;
            } else {
                stats.last_sync_time = Some(Instant::now());
            }
            if state == SyncState::Synced {
                stats.last_error = None;
            }
        }

        tracing::info!(
            submitted = summary.submitted,
            confirmed = summary.confirmed,
            conflicts = summary.conflicts_resolved,
            retrying = summary.retrying,
            failed = summary.failed,
            paused = summary.paused,
            "drain cycle complete"
        );
        *self.last_outcome.lock() = Some(CycleOutcome::Finished(summary.clone()));
        self.observer().on_sync_complete(summary);
    }

    fn apply_result(
        &self,
        op: &SyncOperation,
        result: OperationResult,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        if result.entity_id != op.entity_id {
            let reason = format!(
                "result for {} does not match operation on {}",
                result.entity_id, op.entity_id
            );
            return self.record_failure(op, &reason, summary);
        }

        match result.status {
            ResultStatus::Accepted => self.apply_accepted(op, &result, summary),
            ResultStatus::Rejected => match result.conflict_data {
                Some(conflict) => self.apply_conflict(op, conflict, summary),
                None => {
                    let reason = result.message.unwrap_or_else(|| "rejected by server".into());
                    self.record_failure(op, &reason, summary)
                }
            },
            ResultStatus::Error => {
                let reason = result.message.unwrap_or_else(|| "server error".into());
                self.record_failure(op, &reason, summary)
            }
        }
    }

    fn apply_accepted(
        &self,
        op: &SyncOperation,
        result: &OperationResult,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        let key = op.key();
        let version = result.server_version.unwrap_or(op.client_version + 1);
        let canonical = result
            .canonical_id
            .as_deref()
            .filter(|id| *id != op.entity_id);

        let _write = self.db.write_lock();
        if op.kind != OperationKind::Delete {
            self.db.entities().transaction(|txn| {
                if let Some(mut record) = txn.get(&key) {
                    record.version = version;
                    txn.put(record);
                    if let Some(id) = canonical {
                        txn.rename(&key, id)?;
                    }
                }
                Ok(())
            })?;
        }

        let queue = self.db.queue();
        queue.mark_confirmed(op.id)?;
        queue.rebase(&key, canonical, version)?;
        summary.confirmed += 1;

        tracing::trace!(entity = %key, op_id = op.id, version, "operation accepted");
        Ok(())
    }

    fn apply_conflict(
        &self,
        op: &SyncOperation,
        conflict: ConflictData,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        let key = op.key();
        let queue = self.db.queue();
        let local = ConflictSide::new(op.client_version, op.payload.clone());
        let remote = ConflictSide::new(conflict.remote_version, conflict.remote_payload);
        let resolution = self
            .policy
            .read()
            .resolve(op.entity_type, &op.entity_id, &local, &remote);

        if resolution.is_unresolved() {
            queue.mark_unresolved(op.id, "unresolved conflict")?;
            summary.unresolved += 1;
            tracing::warn!(
                entity = %key,
                remote_version = remote.version,
                "conflict left unresolved"
            );
            self.observer().on_unresolved_conflict(&resolution);
            return Ok(());
        }

        // Newer local edits will be pushed on top of the remote version.
        let _write = self.db.write_lock();
        let newer_local = queue.has_pending(&key);
        self.db.entities().transaction(|txn| {
            if newer_local {
                if let Some(mut record) = txn.get(&key) {
                    record.version = remote.version;
                    txn.put(record);
                }
                return Ok(());
            }
            match &resolution.payload {
                Some(payload) => {
                    let mut record = txn.get(&key).unwrap_or_else(|| {
                        EntityRecord::new(op.entity_type, op.entity_id.clone(), payload.clone())
                    });
                    record.payload = payload.clone();
                    record.version = remote.version;
                    record.updated_at_ms = txn.now_ms();
                    txn.put(record);
                }
                None => {
                    txn.delete(&key);
                }
            }
            Ok(())
        })?;

        queue.mark_confirmed(op.id)?;
        queue.rebase(&key, None, remote.version)?;

        if !newer_local && resolution.needs_push(&remote) {
            let follow_up = match resolution.payload.clone() {
                Some(payload) => NewOperation::update(
                    op.entity_type,
                    op.entity_id.clone(),
                    payload,
                    remote.version,
                ),
                None => NewOperation::delete(op.entity_type, op.entity_id.clone(), remote.version),
            };
            queue.enqueue(follow_up)?;
        }

        summary.conflicts_resolved += 1;
        tracing::debug!(
            entity = %key,
            resolution = ?resolution.resolution,
            remote_version = remote.version,
            "conflict resolved"
        );
        Ok(())
    }

    fn record_failure(
        &self,
        op: &SyncOperation,
        reason: &str,
        summary: &mut DrainSummary,
    ) -> SyncResult<()> {
        match self.db.queue().mark_failed(op.id, reason)? {
            FailOutcome::Retrying {
                retry_count,
                not_before_ms,
            } => {
                summary.retrying += 1;
                tracing::debug!(
                    entity = %op.key(),
                    op_id = op.id,
                    retry_count,
                    not_before_ms,
                    reason,
                    "operation will be retried"
                );
            }
            FailOutcome::Terminal { retry_count } => {
                summary.failed += 1;
                tracing::warn!(
                    entity = %op.key(),
                    op_id = op.id,
                    retry_count,
                    reason,
                    "operation failed"
                );
                self.observer().on_sync_failure(&op.key(), reason);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_activity() {
        assert!(SyncState::Draining.is_active());
        assert!(!SyncState::Offline.is_active());
        assert!(!SyncState::Synced.is_active());
    }

    #[test]
    fn summaries_add_up() {
        let mut total = DrainSummary::default();
        total.merge(&DrainSummary {
            submitted: 3,
            confirmed: 2,
            retrying: 1,
            ..DrainSummary::default()
        });
        total.merge(&DrainSummary {
            submitted: 1,
            confirmed: 1,
            paused: true,
            ..DrainSummary::default()
        });

        assert_eq!(total.submitted, 4);
        assert_eq!(total.confirmed, 3);
        assert!(total.paused);
        assert!(total.progressed());
        assert!(!total.is_clean());
        assert!(DrainSummary::default().is_clean());
        assert!(!DrainSummary::default().progressed());
    }
}
