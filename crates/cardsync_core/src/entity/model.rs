//! Typed entities stored by the app.

use cardsync_sync_protocol::EntityType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A type that can be stored locally and synchronized.
///
/// Implementors serialize to a JSON object whose `id` field matches
/// [`SyncEntity::id`].
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Wire name of this entity type.
    const ENTITY_TYPE: EntityType;

    /// Entity id, unique within the type.
    fn id(&self) -> &str;

    /// Owning account, when the entity tracks one itself. Otherwise the
    /// store's owner is used.
    fn owner_id(&self) -> Option<&str> {
        None
    }
}

/// Generates a fresh client-side id.
#[must_use]
pub fn new_entity_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A built-in vocabulary card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: String,
    pub word: String,
    pub translation: String,
    pub language: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

/// One answered question inside a quiz or game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Entry id; history merges key on it.
    pub id: String,
    pub card_id: String,
    pub correct: bool,
    pub answered_at_ms: u64,
}

/// Result of a finished quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub id: String,
    #[serde(default)]
    pub deck_id: Option<String>,
    pub score: u32,
    pub total: u32,
    pub completed_at_ms: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Result of a finished game round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub id: String,
    pub game: String,
    pub score: u32,
    pub completed_at_ms: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Spaced-repetition schedule of one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacedRepetition {
    pub id: String,
    pub card_id: String,
    pub review_count: u32,
    /// Next review, epoch milliseconds.
    pub due_at: u64,
    pub ease: f64,
    pub interval_days: u32,
}

/// A user-created deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDeck {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub language: String,
    pub created_at_ms: u64,
}

/// A card inside a user-created deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFlashcard {
    pub id: String,
    pub deck_id: String,
    pub front: String,
    pub back: String,
    pub created_at_ms: u64,
}

macro_rules! impl_sync_entity {
    ($($ty:ty => $entity_type:expr),* $(,)?) => {
        $(
            impl SyncEntity for $ty {
                const ENTITY_TYPE: EntityType = $entity_type;

                fn id(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

impl_sync_entity! {
    Flashcard => EntityType::Flashcard,
    QuizResult => EntityType::QuizResult,
    GameResult => EntityType::GameResult,
    SpacedRepetition => EntityType::SpacedRepetition,
    CustomDeck => EntityType::CustomDeck,
    CustomFlashcard => EntityType::CustomFlashcard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_sync_protocol::Payload;

    #[test]
    fn entity_types_are_distinct() {
        let types = [
            Flashcard::ENTITY_TYPE,
            QuizResult::ENTITY_TYPE,
            GameResult::ENTITY_TYPE,
            SpacedRepetition::ENTITY_TYPE,
            CustomDeck::ENTITY_TYPE,
            CustomFlashcard::ENTITY_TYPE,
        ];
        assert_eq!(types, EntityType::ALL);
    }

    #[test]
    fn schedule_payload_uses_merge_field_names() {
        let schedule = SpacedRepetition {
            id: "sr-1".into(),
            card_id: "42".into(),
            review_count: 3,
            due_at: 1_700_000_000_000,
            ease: 2.5,
            interval_days: 4,
        };
        let payload = Payload::from_entity(&schedule).unwrap();
        let object = payload.as_value().as_object().unwrap();
        assert!(object.contains_key("review_count"));
        assert!(object.contains_key("due_at"));
        assert_eq!(payload.to_entity::<SpacedRepetition>().unwrap(), schedule);
    }

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(new_entity_id(), new_entity_id());
    }
}
