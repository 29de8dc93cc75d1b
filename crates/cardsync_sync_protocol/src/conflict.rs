//! Conflict resolution policy.
//!
//! Resolution is a pure function of the entity type, the local side and the
//! remote side. Calling it twice with the same inputs yields the same output.

use crate::entity::EntityType;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Field holding the append-only entries of quiz and game results.
const HISTORY_FIELD: &str = "history";
/// Field naming an entry inside a history.
const ENTRY_ID_FIELD: &str = "id";
const REVIEW_COUNT_FIELD: &str = "review_count";
const DUE_AT_FIELD: &str = "due_at";

/// How a conflict was (or should be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Keep the local snapshot.
    LocalWins,
    /// Accept the server snapshot.
    RemoteWins,
    /// Combine both snapshots with a type-specific merge.
    Merged,
    /// Leave the conflict for the caller.
    Manual,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSide {
    /// Version of this side.
    pub version: u64,
    /// Snapshot, `None` for a deletion.
    pub payload: Option<Payload>,
}

impl ConflictSide {
    /// Creates a side.
    #[must_use]
    pub fn new(version: u64, payload: Option<Payload>) -> Self {
        Self { version, payload }
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolution {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
    /// Version the local mutation was based on.
    pub local_version: u64,
    /// Version the server holds.
    pub remote_version: u64,
    /// Strategy that was applied.
    pub resolution: ResolutionStrategy,
    /// Resolved snapshot; `None` means the entity ends up deleted.
    pub payload: Option<Payload>,
}

impl ConflictResolution {
    /// Returns true if the resolved state differs from the server's and has
    /// to be pushed again.
    #[must_use]
    pub fn needs_push(&self, remote: &ConflictSide) -> bool {
        match self.resolution {
            ResolutionStrategy::RemoteWins | ResolutionStrategy::Manual => false,
            ResolutionStrategy::LocalWins | ResolutionStrategy::Merged => {
                self.payload != remote.payload
            }
        }
    }

    /// Returns true if the conflict still needs a decision by the caller.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.resolution == ResolutionStrategy::Manual
    }
}

/// Table mapping entity types to resolution strategies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictPolicy {
    overrides: BTreeMap<EntityType, ResolutionStrategy>,
}

impl ConflictPolicy {
    /// The default table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the strategy of one entity type.
    #[must_use]
    pub fn with_strategy(mut self, entity_type: EntityType, strategy: ResolutionStrategy) -> Self {
        self.overrides.insert(entity_type, strategy);
        self
    }

    /// Strategy used for `entity_type`.
    #[must_use]
    pub fn strategy_for(&self, entity_type: EntityType) -> ResolutionStrategy {
        if let Some(strategy) = self.overrides.get(&entity_type) {
            return *strategy;
        }
        match entity_type {
            EntityType::Flashcard | EntityType::CustomDeck | EntityType::CustomFlashcard => {
                ResolutionStrategy::RemoteWins
            }
            EntityType::QuizResult | EntityType::GameResult | EntityType::SpacedRepetition => {
                ResolutionStrategy::Merged
            }
        }
    }

    /// Resolves a conflict between `local` and `remote`.
    #[must_use]
    pub fn resolve(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        local: &ConflictSide,
        remote: &ConflictSide,
    ) -> ConflictResolution {
        let strategy = self.strategy_for(entity_type);

        let (resolution, payload) = match strategy {
            ResolutionStrategy::RemoteWins => (strategy, remote.payload.clone()),
            ResolutionStrategy::LocalWins => (strategy, local.payload.clone()),
            ResolutionStrategy::Manual => (strategy, local.payload.clone()),
            ResolutionStrategy::Merged => match merge(entity_type, local, remote) {
                Some(merged) => (ResolutionStrategy::Merged, Some(merged)),
                None => (ResolutionStrategy::RemoteWins, remote.payload.clone()),
            },
        };

        ConflictResolution {
            entity_type,
            entity_id: entity_id.to_string(),
            local_version: local.version,
            remote_version: remote.version,
            resolution,
            payload,
        }
    }
}

/// Resolves with the default policy table.
#[must_use]
pub fn resolve(
    entity_type: EntityType,
    entity_id: &str,
    local: &ConflictSide,
    remote: &ConflictSide,
) -> ConflictResolution {
    ConflictPolicy::default().resolve(entity_type, entity_id, local, remote)
}

/// Merges two object snapshots; `None` when a merge is not possible
/// (a deletion on either side or a non-object snapshot).
fn merge(entity_type: EntityType, local: &ConflictSide, remote: &ConflictSide) -> Option<Payload> {
    let local = local.payload.as_ref()?.as_value().as_object()?;
    let remote = remote.payload.as_ref()?.as_value().as_object()?;

    let merged = match entity_type {
        EntityType::QuizResult | EntityType::GameResult => merge_history(local, remote),
        EntityType::SpacedRepetition => merge_schedule(local, remote),
        _ => return None,
    };
    Some(Payload::new(Value::Object(merged)))
}

/// Union of both histories by entry id. Remote entries come first and win on
/// id collisions; local-only entries follow in local order.
fn merge_history(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = remote.clone();

    let remote_entries = history_entries(remote);
    let mut seen: HashSet<String> = remote_entries.iter().filter_map(|e| entry_id(e)).collect();
    let mut entries = remote_entries.clone();

    for entry in history_entries(local) {
        match entry_id(&entry) {
            Some(id) => {
                if seen.insert(id) {
                    entries.push(entry);
                }
            }
            None => {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
    }

    merged.insert(HISTORY_FIELD.to_string(), Value::Array(entries));
    merged
}

fn history_entries(object: &Map<String, Value>) -> Vec<Value> {
    object
        .get(HISTORY_FIELD)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn entry_id(entry: &Value) -> Option<String> {
    match entry.get(ENTRY_ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Remote schedule with the larger review count and the later due date.
fn merge_schedule(local: &Map<String, Value>, remote: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = remote.clone();

    let review_count = local
        .get(REVIEW_COUNT_FIELD)
        .and_then(Value::as_u64)
        .max(remote.get(REVIEW_COUNT_FIELD).and_then(Value::as_u64));
    if let Some(count) = review_count {
        merged.insert(REVIEW_COUNT_FIELD.to_string(), Value::from(count));
    }

    if let Some(due) = latest(local.get(DUE_AT_FIELD), remote.get(DUE_AT_FIELD)) {
        merged.insert(DUE_AT_FIELD.to_string(), due);
    }

    merged
}

/// Later of two timestamps: epoch numbers compare numerically, ISO-8601
/// strings lexicographically. Mixed or missing values prefer the remote.
fn latest(local: Option<&Value>, remote: Option<&Value>) -> Option<Value> {
    match (local, remote) {
        (Some(Value::Number(l)), Some(Value::Number(r))) => {
            let pick = match (l.as_i64(), r.as_i64()) {
                (Some(a), Some(b)) if a > b => l,
                _ => r,
            };
            Some(Value::Number(pick.clone()))
        }
        (Some(Value::String(l)), Some(Value::String(r))) => {
            Some(Value::String(if l > r { l.clone() } else { r.clone() }))
        }
        (Some(l), None) => Some(l.clone()),
        (_, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn side(version: u64, value: Value) -> ConflictSide {
        ConflictSide::new(version, Some(Payload::new(value)))
    }

    #[test]
    fn default_table() {
        let policy = ConflictPolicy::default();
        assert_eq!(policy.strategy_for(EntityType::Flashcard), ResolutionStrategy::RemoteWins);
        assert_eq!(policy.strategy_for(EntityType::CustomDeck), ResolutionStrategy::RemoteWins);
        assert_eq!(
            policy.strategy_for(EntityType::CustomFlashcard),
            ResolutionStrategy::RemoteWins
        );
        assert_eq!(policy.strategy_for(EntityType::QuizResult), ResolutionStrategy::Merged);
        assert_eq!(policy.strategy_for(EntityType::GameResult), ResolutionStrategy::Merged);
        assert_eq!(
            policy.strategy_for(EntityType::SpacedRepetition),
            ResolutionStrategy::Merged
        );
    }

    #[test]
    fn flashcard_remote_wins() {
        let local = side(3, json!({"front": "local"}));
        let remote = side(5, json!({"front": "remote"}));

        let resolution = resolve(EntityType::Flashcard, "42", &local, &remote);
        assert_eq!(resolution.resolution, ResolutionStrategy::RemoteWins);
        assert_eq!(resolution.local_version, 3);
        assert_eq!(resolution.remote_version, 5);
        assert_eq!(resolution.payload, remote.payload);
        assert!(!resolution.needs_push(&remote));
    }

    #[test]
    fn override_makes_local_win() {
        let policy = ConflictPolicy::new()
            .with_strategy(EntityType::CustomDeck, ResolutionStrategy::LocalWins);
        let local = side(1, json!({"name": "Verbs"}));
        let remote = side(2, json!({"name": "Old"}));

        let resolution = policy.resolve(EntityType::CustomDeck, "d1", &local, &remote);
        assert_eq!(resolution.resolution, ResolutionStrategy::LocalWins);
        assert_eq!(resolution.payload, local.payload);
        assert!(resolution.needs_push(&remote));
    }

    #[test]
    fn quiz_history_union_by_id() {
        let local = side(
            2,
            json!({"score": 3, "history": [{"id": "a", "ok": true}, {"id": "c", "ok": false}]}),
        );
        let remote = side(
            4,
            json!({"score": 5, "history": [{"id": "a", "ok": false}, {"id": "b", "ok": true}]}),
        );

        let resolution = resolve(EntityType::QuizResult, "q1", &local, &remote);
        assert_eq!(resolution.resolution, ResolutionStrategy::Merged);
        let merged = resolution.payload.unwrap().into_value();
        assert_eq!(
            merged,
            json!({
                "score": 5,
                "history": [
                    {"id": "a", "ok": false},
                    {"id": "b", "ok": true},
                    {"id": "c", "ok": false}
                ]
            })
        );
    }

    #[test]
    fn spaced_repetition_takes_max_count_and_latest_due() {
        let local = side(
            1,
            json!({"card_id": "42", "review_count": 9, "due_at": 1_000, "ease": 2.1}),
        );
        let remote = side(
            2,
            json!({"card_id": "42", "review_count": 7, "due_at": 2_000, "ease": 2.5}),
        );

        let merged = resolve(EntityType::SpacedRepetition, "42", &local, &remote)
            .payload
            .unwrap()
            .into_value();
        assert_eq!(merged["review_count"], json!(9));
        assert_eq!(merged["due_at"], json!(2_000));
        assert_eq!(merged["ease"], json!(2.5));
    }

    #[test]
    fn iso_due_dates_compare_lexicographically() {
        let local = side(1, json!({"review_count": 1, "due_at": "2026-03-02T10:00:00Z"}));
        let remote = side(2, json!({"review_count": 1, "due_at": "2026-02-28T10:00:00Z"}));

        let merged = resolve(EntityType::SpacedRepetition, "7", &local, &remote)
            .payload
            .unwrap()
            .into_value();
        assert_eq!(merged["due_at"], json!("2026-03-02T10:00:00Z"));
    }

    #[test]
    fn merge_with_remote_deletion_falls_back_to_remote() {
        let local = side(1, json!({"history": []}));
        let remote = ConflictSide::new(3, None);

        let resolution = resolve(EntityType::GameResult, "g", &local, &remote);
        assert_eq!(resolution.resolution, ResolutionStrategy::RemoteWins);
        assert!(resolution.payload.is_none());
    }

    #[test]
    fn manual_is_unresolved() {
        let policy =
            ConflictPolicy::new().with_strategy(EntityType::Flashcard, ResolutionStrategy::Manual);
        let resolution = policy.resolve(
            EntityType::Flashcard,
            "1",
            &side(1, json!({})),
            &side(2, json!({})),
        );
        assert!(resolution.is_unresolved());
    }

    fn arb_history() -> impl Strategy<Value = Value> {
        prop::collection::vec((0u8..6, any::<bool>()), 0..6).prop_map(|entries| {
            let history: Vec<Value> = entries
                .into_iter()
                .map(|(id, ok)| json!({"id": id.to_string(), "ok": ok}))
                .collect();
            json!({ "history": history })
        })
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(
            local in arb_history(),
            remote in arb_history(),
            v in 0u64..10,
        ) {
            let local = side(v, local);
            let remote = side(v + 1, remote);
            for entity_type in EntityType::ALL {
                let first = resolve(entity_type, "x", &local, &remote);
                let second = resolve(entity_type, "x", &local, &remote);
                prop_assert_eq!(first, second);
            }
        }

        #[test]
        fn merged_history_keeps_every_remote_entry(
            local in arb_history(),
            remote in arb_history(),
        ) {
            let remote_side = side(2, remote.clone());
            let merged = resolve(EntityType::QuizResult, "q", &side(1, local), &remote_side)
                .payload
                .unwrap()
                .into_value();
            let merged_entries = merged["history"].as_array().unwrap();
            for entry in remote["history"].as_array().unwrap() {
                prop_assert!(merged_entries.contains(entry));
            }
        }
    }
}
