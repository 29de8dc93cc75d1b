//! Queued operation types.

use cardsync_sync_protocol::{EntityKey, EntityType, OperationKind, Payload, WireOperation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a queued operation.
///
/// ```text
/// Pending ──dequeue──▶ InFlight ──accepted──▶ Confirmed
///    ▲                    │
///    └──release/retry─────┤
///                         └──retries exhausted──▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Waiting to be sent.
    Pending,
    /// Part of a batch that has been sent and not yet answered.
    InFlight,
    /// Accepted by the server, or absorbed into a later operation.
    Confirmed,
    /// Gave up after repeated failures or an unresolved conflict.
    Failed,
}

impl OperationStatus {
    /// Lower-case name, as shown by tooling.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InFlight => "in_flight",
            OperationStatus::Confirmed => "confirmed",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One local mutation waiting to reach the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Queue-assigned id, unique and increasing.
    pub id: u64,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Entity snapshot; `None` for deletes.
    pub payload: Option<Payload>,
    /// Server version the mutation was based on.
    pub client_version: u64,
    /// Logical enqueue order.
    pub created_at: u64,
    /// Wall-clock enqueue time, epoch milliseconds.
    pub enqueued_at_ms: u64,
    /// Current status.
    pub status: OperationStatus,
    /// Application errors seen so far.
    pub retry_count: u32,
    /// Not eligible for dequeue before this time, epoch milliseconds.
    pub not_before_ms: u64,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// When the operation was confirmed, epoch milliseconds.
    pub confirmed_at_ms: Option<u64>,
    /// Submitted at least once, so the server may already have applied it
    /// under this id.
    #[serde(default)]
    pub sent: bool,
}

impl SyncOperation {
    /// Key of the targeted entity.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }

    /// Returns true if this operation targets `key`.
    #[must_use]
    pub fn targets(&self, key: &EntityKey) -> bool {
        self.entity_type == key.entity_type && self.entity_id == key.entity_id
    }

    /// Wire form of this operation.
    #[must_use]
    pub fn to_wire(&self) -> WireOperation {
        WireOperation {
            op_id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            operation_kind: self.kind,
            payload: self.payload.clone(),
            client_version: self.client_version,
        }
    }
}

/// A mutation to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
    /// Create, update or delete.
    pub kind: OperationKind,
    /// Entity snapshot.
    pub payload: Option<Payload>,
    /// Server version the mutation was based on.
    pub client_version: u64,
}

impl NewOperation {
    /// A create of a never-synced entity.
    pub fn create(entity_type: EntityType, entity_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            kind: OperationKind::Create,
            payload: Some(payload),
            client_version: 0,
        }
    }

    /// An update based on `client_version`.
    pub fn update(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: Payload,
        client_version: u64,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            kind: OperationKind::Update,
            payload: Some(payload),
            client_version,
        }
    }

    /// A delete based on `client_version`.
    pub fn delete(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        client_version: u64,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            kind: OperationKind::Delete,
            payload: None,
            client_version,
        }
    }
}

/// What happened to an operation after an application error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, gated until `not_before_ms`.
    Retrying {
        /// Failures so far.
        retry_count: u32,
        /// Earliest time of the next attempt.
        not_before_ms: u64,
    },
    /// Retries exhausted; the operation is now failed.
    Terminal {
        /// Failures so far.
        retry_count: u32,
    },
}

impl FailOutcome {
    /// Returns true if the operation will not be retried.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailOutcome::Terminal { .. })
    }
}

/// Operation counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting to be sent.
    pub pending: usize,
    /// Sent, not yet answered.
    pub in_flight: usize,
    /// Confirmed and not yet purged.
    pub confirmed: usize,
    /// Terminally failed.
    pub failed: usize,
}

impl QueueStats {
    /// Total operations held.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.confirmed + self.failed
    }

    /// Operations that still have to reach the server.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_flight
    }
}
