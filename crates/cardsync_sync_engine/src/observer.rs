//! Caller notifications.

use crate::engine::DrainSummary;
use cardsync_sync_protocol::{ConflictResolution, EntityKey};
use parking_lot::Mutex;

/// Receives the events the app has to react to.
///
/// Methods are called on the thread running the drain cycle and must not
/// block for long.
pub trait SyncObserver: Send + Sync {
    /// An operation failed for good.
    fn on_sync_failure(&self, _entity: &EntityKey, _reason: &str) {}

    /// A drain cycle finished.
    fn on_sync_complete(&self, _summary: &DrainSummary) {}

    /// A conflict was left for the caller to resolve.
    fn on_unresolved_conflict(&self, _conflict: &ConflictResolution) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// A recorded notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// See [`SyncObserver::on_sync_failure`].
    Failure {
        /// Entity whose operation failed.
        entity: EntityKey,
        /// Last failure reason.
        reason: String,
    },
    /// See [`SyncObserver::on_sync_complete`].
    Complete(DrainSummary),
    /// See [`SyncObserver::on_unresolved_conflict`].
    UnresolvedConflict(ConflictResolution),
}

/// Observer that keeps every event, for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Failure events so far.
    pub fn failures(&self) -> Vec<(EntityKey, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SyncEvent::Failure { entity, reason } => Some((entity.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    /// Unresolved conflicts so far.
    pub fn conflicts(&self) -> Vec<ConflictResolution> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SyncEvent::UnresolvedConflict(conflict) => Some(conflict.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of completed cycles seen.
    pub fn completions(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, SyncEvent::Complete(_)))
            .count()
    }
}

impl SyncObserver for RecordingObserver {
    fn on_sync_failure(&self, entity: &EntityKey, reason: &str) {
        self.events.lock().push(SyncEvent::Failure {
            entity: entity.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_sync_complete(&self, summary: &DrainSummary) {
        self.events.lock().push(SyncEvent::Complete(summary.clone()));
    }

    fn on_unresolved_conflict(&self, conflict: &ConflictResolution) {
        self.events
            .lock()
            .push(SyncEvent::UnresolvedConflict(conflict.clone()));
    }
}
