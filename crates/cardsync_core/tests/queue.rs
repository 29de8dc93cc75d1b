//! Operation queue behaviour, including restarts.

use cardsync_core::{
    Clock, CoreError, EntityKey, EntityType, FailOutcome, ManualClock, NewOperation, OperationQueue,
    OperationStatus, Payload, RetryConfig, StoreConfig,
};
use cardsync_storage::InMemoryBackend;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const START_MS: u64 = 1_700_000_000_000;

struct Harness {
    backend: InMemoryBackend,
    clock: Arc<ManualClock>,
    config: StoreConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    fn with_config(config: StoreConfig) -> Self {
        Self {
            backend: InMemoryBackend::new(),
            clock: Arc::new(ManualClock::new(START_MS)),
            config,
        }
    }

    /// Opens (or reopens) the queue on the shared backend.
    fn open(&self) -> OperationQueue {
        OperationQueue::open(Box::new(self.backend.share()), &self.config, self.clock.clone())
            .unwrap()
    }
}

fn card_update(id: &str, front: &str) -> NewOperation {
    NewOperation::update(
        EntityType::Flashcard,
        id,
        Payload::new(json!({"id": id, "front": front})),
        1,
    )
}

#[test]
fn enqueue_assigns_increasing_ids() {
    let h = Harness::new();
    let queue = h.open();

    let a = queue.enqueue(card_update("1", "a")).unwrap();
    let b = queue.enqueue(card_update("2", "b")).unwrap();

    assert!(b.id > a.id);
    assert!(b.created_at > a.created_at);
    assert_eq!(a.status, OperationStatus::Pending);
    assert_eq!(a.enqueued_at_ms, START_MS);
    assert_eq!(queue.stats().pending, 2);
}

#[test]
fn enqueue_validates_input() {
    let h = Harness::with_config(StoreConfig::default().max_payload_size(32));
    let queue = h.open();

    let empty_id = queue.enqueue(card_update("", "a"));
    assert!(matches!(empty_id, Err(CoreError::Validation(_))));

    let padded_id = queue.enqueue(card_update(" 1", "a"));
    assert!(matches!(padded_id, Err(CoreError::Validation(_))));

    let missing_payload = queue.enqueue(NewOperation {
        payload: None,
        ..card_update("1", "a")
    });
    assert!(matches!(missing_payload, Err(CoreError::Validation(_))));

    let too_big = queue.enqueue(card_update("1", &"x".repeat(64)));
    assert!(matches!(too_big, Err(CoreError::Validation(_))));

    assert_eq!(queue.stats().total(), 0);
}

#[test]
fn delete_drops_payload() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue
        .enqueue(NewOperation {
            payload: Some(Payload::new(json!({"stale": true}))),
            ..NewOperation::delete(EntityType::CustomDeck, "d1", 3)
        })
        .unwrap();
    assert!(op.payload.is_none());
    assert_eq!(op.client_version, 3);
}

#[test]
fn enqueue_raw_parses_names() {
    let h = Harness::new();
    let queue = h.open();

    let op = queue
        .enqueue_raw("spaced_repetition", "sr-1", "create", Some(r#"{"id":"sr-1"}"#), 0)
        .unwrap();
    assert_eq!(op.entity_type, EntityType::SpacedRepetition);

    for (entity_type, kind, payload) in [
        ("deck", "create", Some("{}")),
        ("flashcard", "upsert", Some("{}")),
        ("flashcard", "create", Some("{not json")),
    ] {
        let result = queue.enqueue_raw(entity_type, "1", kind, payload, 0);
        assert!(result.unwrap_err().is_validation(), "{entity_type} {kind}");
    }
}

#[test]
fn dequeue_is_fifo_and_marks_in_flight() {
    let h = Harness::new();
    let queue = h.open();
    for i in 0..5 {
        queue.enqueue(card_update(&i.to_string(), "x")).unwrap();
    }

    let batch = queue.dequeue_batch(3).unwrap();
    let ids: Vec<&str> = batch.iter().map(|op| op.entity_id.as_str()).collect();
    assert_eq!(ids, ["0", "1", "2"]);
    assert!(batch.iter().all(|op| op.status == OperationStatus::InFlight));

    let stats = queue.stats();
    assert_eq!(stats.in_flight, 3);
    assert_eq!(stats.pending, 2);

    // Nothing is handed out twice.
    let rest = queue.dequeue_batch(10).unwrap();
    assert_eq!(rest.len(), 2);
    assert!(queue.dequeue_batch(10).unwrap().is_empty());
}

#[test]
fn dequeue_skips_entities_with_work_in_flight() {
    let h = Harness::new();
    let queue = h.open();
    queue.enqueue(card_update("1", "a")).unwrap();
    let first = queue.dequeue_batch(10).unwrap();
    assert_eq!(first.len(), 1);

    queue.enqueue(card_update("1", "b")).unwrap();
    queue.enqueue(card_update("2", "c")).unwrap();

    let second = queue.dequeue_batch(10).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].entity_id, "2");

    queue.mark_confirmed(first[0].id).unwrap();
    let third = queue.dequeue_batch(10).unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].payload.as_ref().unwrap().as_value()["front"], "b");
}

#[test]
fn application_errors_back_off_then_fail() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();

    let mut delays = Vec::new();
    for attempt in 1..=4u32 {
        let batch = queue.dequeue_batch(10).unwrap();
        assert_eq!(batch.len(), 1, "attempt {attempt}");

        match queue.mark_failed(op.id, "server busy").unwrap() {
            FailOutcome::Retrying {
                retry_count,
                not_before_ms,
            } => {
                assert_eq!(retry_count, attempt);
                delays.push(not_before_ms - h.clock.now_millis());
            }
            FailOutcome::Terminal { .. } => panic!("terminal too early"),
        }

        // Gated until the backoff passes.
        assert!(queue.dequeue_batch(10).unwrap().is_empty());
        assert!(queue.next_retry_at().is_some());
        h.clock.advance(Duration::from_secs(60));
    }
    assert_eq!(delays, [1_000, 2_000, 4_000, 8_000]);

    queue.dequeue_batch(10).unwrap();
    let outcome = queue.mark_failed(op.id, "server busy").unwrap();
    assert_eq!(outcome, FailOutcome::Terminal { retry_count: 5 });

    let failed = queue.get(op.id).unwrap();
    assert_eq!(failed.status, OperationStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("server busy"));
    assert!(queue.dequeue_batch(10).unwrap().is_empty());
}

#[test]
fn backoff_keeps_later_ops_of_same_entity_waiting() {
    let h = Harness::with_config(StoreConfig::default());
    let queue = h.open();
    let first = queue.enqueue(card_update("1", "a")).unwrap();
    queue.dequeue_batch(10).unwrap();
    queue.mark_failed(first.id, "busy").unwrap();

    queue.enqueue(card_update("1", "b")).unwrap();
    queue.enqueue(card_update("2", "c")).unwrap();

    let batch = queue.dequeue_batch(10).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].entity_id, "2");
}

#[test]
fn release_has_no_penalty() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();
    queue.dequeue_batch(10).unwrap();
    queue.release(op.id).unwrap();

    let released = queue.get(op.id).unwrap();
    assert_eq!(released.status, OperationStatus::Pending);
    assert_eq!(released.retry_count, 0);
    assert_eq!(queue.dequeue_batch(10).unwrap().len(), 1);
}

#[test]
fn transitions_are_checked() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();

    let result = queue.mark_confirmed(op.id);
    assert!(matches!(
        result,
        Err(CoreError::InvalidTransition {
            from: OperationStatus::Pending,
            to: OperationStatus::Confirmed,
            ..
        })
    ));
    assert!(matches!(queue.release(999), Err(CoreError::OperationNotFound(999))));
}

#[test]
fn supersede_keeps_one_op_per_entity() {
    let h = Harness::new();
    let queue = h.open();
    let create = queue
        .enqueue(NewOperation::create(
            EntityType::Flashcard,
            "1",
            Payload::new(json!({"id": "1", "front": "a"})),
        ))
        .unwrap();
    let update = queue.enqueue(card_update("1", "b")).unwrap();
    queue.dequeue_batch(10).unwrap();

    let mut net = update.clone();
    net.client_version = create.client_version;
    queue.supersede(&net, &[create.id]).unwrap();

    assert_eq!(queue.get(create.id).unwrap().status, OperationStatus::Confirmed);
    let kept = queue.get(update.id).unwrap();
    assert_eq!(kept.status, OperationStatus::InFlight);
    assert_eq!(kept.client_version, 0);
    assert_eq!(queue.stats().in_flight, 1);
}

#[test]
fn rebase_moves_pending_ops() {
    let h = Harness::new();
    let queue = h.open();
    let first = queue
        .enqueue(NewOperation::create(
            EntityType::CustomDeck,
            "tmp",
            Payload::new(json!({"id": "tmp"})),
        ))
        .unwrap();
    queue.dequeue_batch(10).unwrap();
    let second = queue
        .enqueue(NewOperation::update(
            EntityType::CustomDeck,
            "tmp",
            Payload::new(json!({"id": "tmp", "name": "x"})),
            0,
        ))
        .unwrap();

    let key = EntityKey::new(EntityType::CustomDeck, "tmp");
    let changed = queue.rebase(&key, Some("deck-9"), 1).unwrap();
    assert_eq!(changed, 1);

    let rebased = queue.get(second.id).unwrap();
    assert_eq!(rebased.entity_id, "deck-9");
    assert_eq!(rebased.client_version, 1);
    // In-flight work is left alone.
    assert_eq!(queue.get(first.id).unwrap().entity_id, "tmp");
}

#[test]
fn purge_respects_retention() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();
    queue.dequeue_batch(10).unwrap();
    queue.mark_confirmed(op.id).unwrap();

    assert_eq!(queue.purge_confirmed(Duration::from_secs(3600)).unwrap(), 0);
    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(queue.purge_confirmed(Duration::from_secs(3600)).unwrap(), 1);
    assert!(queue.get(op.id).is_none());

    // Ids are never reused after a purge.
    let next = queue.enqueue(card_update("2", "b")).unwrap();
    assert!(next.id > op.id);
}

#[test]
fn retry_failed_resets_attempts() {
    let h = Harness::with_config(StoreConfig::default().retry(RetryConfig::immediate(1)));
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();
    queue.dequeue_batch(10).unwrap();
    assert!(queue.mark_failed(op.id, "nope").unwrap().is_terminal());

    assert_eq!(queue.retry_failed().unwrap(), 1);
    let retried = queue.get(op.id).unwrap();
    assert_eq!(retried.status, OperationStatus::Pending);
    assert_eq!(retried.retry_count, 0);
}

#[test]
fn state_survives_reopen() {
    let h = Harness::new();
    let (confirmed, failing, in_flight) = {
        let queue = h.open();
        let confirmed = queue.enqueue(card_update("1", "a")).unwrap();
        let failing = queue.enqueue(card_update("2", "b")).unwrap();
        let in_flight = queue.enqueue(card_update("3", "c")).unwrap();
        queue.dequeue_batch(10).unwrap();
        queue.mark_confirmed(confirmed.id).unwrap();
        queue.mark_failed(failing.id, "busy").unwrap();
        (confirmed, failing, in_flight)
    };

    let queue = h.open();
    assert_eq!(queue.get(confirmed.id).unwrap().status, OperationStatus::Confirmed);

    let failing = queue.get(failing.id).unwrap();
    assert_eq!(failing.status, OperationStatus::Pending);
    assert_eq!(failing.retry_count, 1);
    assert_eq!(failing.last_error.as_deref(), Some("busy"));

    // Interrupted work comes back as pending, without a penalty.
    let reverted = queue.get(in_flight.id).unwrap();
    assert_eq!(reverted.status, OperationStatus::Pending);
    assert_eq!(reverted.retry_count, 0);

    let next = queue.enqueue(card_update("4", "d")).unwrap();
    assert!(next.id > in_flight.id);
}

#[test]
fn torn_tail_loses_only_the_last_write() {
    let h = Harness::new();
    {
        let queue = h.open();
        queue.enqueue(card_update("1", "a")).unwrap();
        queue.enqueue(card_update("2", "b")).unwrap();
    }

    let mut bytes = h.backend.data();
    bytes.truncate(bytes.len() - 3);
    let torn = InMemoryBackend::with_data(bytes);

    let queue = OperationQueue::open(Box::new(torn), &h.config, h.clock.clone()).unwrap();
    let ops = queue.list();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].entity_id, "1");
}

#[test]
fn compaction_preserves_queue() {
    let h = Harness::with_config(StoreConfig::default().compaction_threshold(8));
    {
        let queue = h.open();
        for i in 0..30 {
            let op = queue.enqueue(card_update("1", &format!("v{i}"))).unwrap();
            queue.dequeue_batch(10).unwrap();
            queue.mark_confirmed(op.id).unwrap();
            h.clock.advance(Duration::from_secs(10));
            queue.purge_confirmed(Duration::from_secs(5)).unwrap();
        }
        queue.enqueue(card_update("2", "last")).unwrap();
    }

    let queue = h.open();
    let stats = queue.stats();
    assert_eq!(stats.pending, 1);
    assert!(stats.confirmed <= 1);
    let next = queue.enqueue(card_update("3", "x")).unwrap();
    assert!(next.id > 31);
}

#[derive(Debug, Clone)]
enum Step {
    Enqueue(u8),
    Dequeue(usize),
    Confirm,
}

#[test]
fn concurrent_dequeues_hand_out_disjoint_batches() {
    let h = Harness::new();
    let queue = h.open();
    for i in 0..200 {
        queue.enqueue(card_update(&i.to_string(), "x")).unwrap();
    }

    let batches: Vec<Vec<u64>> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut taken = Vec::new();
                    loop {
                        let batch = queue.dequeue_batch(7).unwrap();
                        if batch.is_empty() {
                            break taken;
                        }
                        taken.extend(batch.into_iter().map(|op| op.id));
                    }
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut seen = BTreeSet::new();
    for id in batches.iter().flatten() {
        assert!(seen.insert(*id), "operation {id} handed out twice");
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(queue.stats().in_flight, 200);
}

#[test]
fn sent_marker_survives_release_and_restart() {
    let h = Harness::new();
    let queue = h.open();
    let op = queue.enqueue(card_update("1", "a")).unwrap();
    assert!(!op.sent);

    queue.dequeue_batch(1).unwrap();
    queue.mark_sent(&[op.id]).unwrap();
    queue.release(op.id).unwrap();
    assert!(queue.get(op.id).unwrap().sent);

    queue.dequeue_batch(1).unwrap();
    drop(queue);
    let queue = h.open();
    let reopened = queue.get(op.id).unwrap();
    assert_eq!(reopened.status, OperationStatus::Pending);
    assert!(reopened.sent);

    assert!(matches!(
        queue.mark_sent(&[op.id]),
        Err(CoreError::InvalidTransition { .. })
    ));
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4).prop_map(Step::Enqueue),
        (1usize..4).prop_map(Step::Dequeue),
        Just(Step::Confirm),
    ]
}

proptest! {
    /// Whatever the interleaving, an operation is handed out at most once
    /// and an entity never has two operations in flight.
    #[test]
    fn dequeue_never_double_sends(steps in prop::collection::vec(step(), 1..60)) {
        let h = Harness::new();
        let queue = h.open();
        let mut handed_out = BTreeSet::new();
        let mut in_flight: Vec<(u64, String)> = Vec::new();

        for step in steps {
            match step {
                Step::Enqueue(entity) => {
                    queue.enqueue(card_update(&entity.to_string(), "x")).unwrap();
                }
                Step::Dequeue(size) => {
                    let batch = queue.dequeue_batch(size).unwrap();
                    prop_assert!(batch.len() <= size);
                    let busy: BTreeSet<String> =
                        in_flight.iter().map(|(_, entity)| entity.clone()).collect();
                    for op in batch {
                        prop_assert!(handed_out.insert(op.id));
                        prop_assert!(!busy.contains(&op.entity_id));
                        in_flight.push((op.id, op.entity_id));
                    }
                }
                Step::Confirm => {
                    if !in_flight.is_empty() {
                        let (id, _) = in_flight.remove(0);
                        queue.mark_confirmed(id).unwrap();
                    }
                }
            }
        }
        prop_assert_eq!(queue.stats().in_flight, in_flight.len());
    }
}
