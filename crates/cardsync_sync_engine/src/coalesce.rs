//! Coalescing of queued operations.
//!
//! Several queued mutations of one entity are sent as a single net
//! operation:
//!
//! | queued (oldest first)   | sent                                   |
//! |-------------------------|----------------------------------------|
//! | one operation           | unchanged                              |
//! | anything, then Delete   | Delete                                 |
//! | otherwise               | Update with the newest payload         |
//!
//! The net operation keeps the id of the newest operation and the base
//! `client_version` of the oldest one. The server treats an Update of an
//! unknown entity as a create, so a Create followed by Updates still lands.
//!
//! An operation that was already submitted is resent exactly as before,
//! under its own id, so the server can recognise it as a replay. Older
//! operations fold into it; newer ones are deferred to a later batch,
//! after the resend has been answered and they have been rebased.

use cardsync_core::SyncOperation;
use cardsync_sync_protocol::{EntityKey, OperationKind};
use std::collections::HashMap;

/// The net operation for one entity and the operations it replaces.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalescedOperation {
    /// Operation to send.
    pub net: SyncOperation,
    /// Ids of the operations folded into `net`.
    pub superseded: Vec<u64>,
    /// Ids of newer operations held back until `net` is answered.
    pub deferred: Vec<u64>,
}

/// Folds a batch into one net operation per entity.
///
/// Entities keep the order of their oldest operation in the batch.
#[must_use]
pub fn coalesce(mut ops: Vec<SyncOperation>) -> Vec<CoalescedOperation> {
    ops.sort_by_key(|op| (op.created_at, op.id));

    let mut order: Vec<EntityKey> = Vec::new();
    let mut groups: HashMap<EntityKey, Vec<SyncOperation>> = HashMap::new();
    for op in ops {
        let key = op.key();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(op);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(fold)
        .collect()
}

fn fold(mut group: Vec<SyncOperation>) -> Option<CoalescedOperation> {
    if let Some(pos) = group.iter().position(|op| op.sent) {
        let mut resend = group.split_off(pos);
        let deferred = resend.split_off(1).into_iter().map(|op| op.id).collect();
        let net = resend.pop()?;
        return Some(CoalescedOperation {
            net,
            superseded: group.into_iter().map(|op| op.id).collect(),
            deferred,
        });
    }

    let latest = group.pop()?;
    if group.is_empty() {
        return Some(CoalescedOperation {
            net: latest,
            superseded: Vec::new(),
            deferred: Vec::new(),
        });
    }

    let base_version = group[0].client_version;
    let mut net = latest;
    net.client_version = base_version;
    if net.kind != OperationKind::Delete {
        net.kind = OperationKind::Update;
    }

    Some(CoalescedOperation {
        net,
        superseded: group.into_iter().map(|op| op.id).collect(),
        deferred: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_core::OperationStatus;
    use cardsync_sync_protocol::{EntityType, Payload};
    use serde_json::json;

    fn op(id: u64, entity: &str, kind: OperationKind, version: u64) -> SyncOperation {
        SyncOperation {
            id,
            entity_type: EntityType::Flashcard,
            entity_id: entity.into(),
            kind,
            payload: (kind != OperationKind::Delete).then(|| Payload::new(json!({"rev": id}))),
            client_version: version,
            created_at: id,
            enqueued_at_ms: 0,
            status: OperationStatus::InFlight,
            retry_count: 0,
            not_before_ms: 0,
            last_error: None,
            confirmed_at_ms: None,
            sent: false,
        }
    }

    #[test]
    fn single_operation_is_unchanged() {
        let create = op(1, "a", OperationKind::Create, 0);
        let result = coalesce(vec![create.clone()]);
        assert_eq!(
            result,
            vec![CoalescedOperation {
                net: create,
                superseded: vec![],
                deferred: vec![],
            }]
        );
    }

    #[test]
    fn create_then_updates_becomes_update() {
        let result = coalesce(vec![
            op(1, "a", OperationKind::Create, 0),
            op(2, "a", OperationKind::Update, 0),
            op(3, "a", OperationKind::Update, 0),
        ]);
        assert_eq!(result.len(), 1);
        let net = &result[0].net;
        assert_eq!(net.id, 3);
        assert_eq!(net.kind, OperationKind::Update);
        assert_eq!(net.payload.as_ref().unwrap().as_value()["rev"], 3);
        assert_eq!(result[0].superseded, vec![1, 2]);
    }

    #[test]
    fn trailing_delete_wins() {
        let result = coalesce(vec![
            op(1, "a", OperationKind::Update, 4),
            op(2, "a", OperationKind::Delete, 5),
        ]);
        let net = &result[0].net;
        assert_eq!(net.kind, OperationKind::Delete);
        assert!(net.payload.is_none());
        assert_eq!(net.client_version, 4);
    }

    #[test]
    fn delete_then_create_becomes_update() {
        let result = coalesce(vec![
            op(1, "a", OperationKind::Delete, 2),
            op(2, "a", OperationKind::Create, 0),
        ]);
        assert_eq!(result[0].net.kind, OperationKind::Update);
        assert_eq!(result[0].net.client_version, 2);
    }

    #[test]
    fn entities_keep_first_seen_order() {
        let result = coalesce(vec![
            op(1, "b", OperationKind::Update, 1),
            op(2, "a", OperationKind::Update, 1),
            op(3, "b", OperationKind::Update, 1),
        ]);
        let ids: Vec<&str> = result.iter().map(|c| c.net.entity_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn resent_operation_keeps_its_id() {
        let mut resend = op(1, "a", OperationKind::Create, 0);
        resend.sent = true;
        let result = coalesce(vec![
            resend.clone(),
            op(2, "a", OperationKind::Update, 0),
            op(3, "a", OperationKind::Update, 0),
        ]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].net, resend);
        assert!(result[0].superseded.is_empty());
        assert_eq!(result[0].deferred, vec![2, 3]);
    }

    #[test]
    fn older_edits_fold_into_a_resend() {
        let mut resend = op(2, "a", OperationKind::Update, 1);
        resend.sent = true;
        let result = coalesce(vec![
            op(1, "a", OperationKind::Update, 1),
            resend.clone(),
            op(3, "a", OperationKind::Delete, 1),
        ]);
        assert_eq!(result[0].net, resend);
        assert_eq!(result[0].superseded, vec![1]);
        assert_eq!(result[0].deferred, vec![3]);
    }
}
