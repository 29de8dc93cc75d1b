//! Local entity records and their store.

mod model;
mod store;

pub use model::{
    new_entity_id, CustomDeck, CustomFlashcard, Flashcard, GameResult, HistoryEntry, QuizResult,
    SpacedRepetition, SyncEntity,
};
pub use store::{EntityStore, StoreTransaction};

use cardsync_sync_protocol::{EntityKey, EntityType, Payload};
use serde::{Deserialize, Serialize};

/// The local copy of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub id: String,
    /// Account the record belongs to. Empty in stores written before
    /// schema version 2.
    #[serde(default)]
    pub owner_id: String,
    /// Last server version this record was reconciled with (0 if never
    /// synced).
    #[serde(default)]
    pub version: u64,
    /// Local modification time, epoch milliseconds.
    #[serde(default)]
    pub updated_at_ms: u64,
    /// Entity snapshot.
    pub payload: Payload,
}

impl EntityRecord {
    /// Creates an unsynced record.
    pub fn new(entity_type: EntityType, id: impl Into<String>, payload: Payload) -> Self {
        Self {
            entity_type,
            id: id.into(),
            owner_id: String::new(),
            version: 0,
            updated_at_ms: 0,
            payload,
        }
    }

    /// Key of this record.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.id.clone())
    }

    /// Sets the server version.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = owner.into();
        self
    }

    /// Moves the record to a new id, rewriting the payload's `id` field
    /// when it has one.
    pub fn rekey(&mut self, new_id: &str) {
        self.id = new_id.to_string();
        self.payload = self.payload.clone().with_id(new_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rekey_rewrites_payload_id() {
        let mut record = EntityRecord::new(
            EntityType::CustomDeck,
            "tmp-1",
            Payload::new(json!({"id": "tmp-1", "name": "Verbs"})),
        );
        record.rekey("deck-77");
        assert_eq!(record.id, "deck-77");
        assert_eq!(record.payload.as_value()["id"], "deck-77");
        assert_eq!(record.payload.as_value()["name"], "Verbs");
    }

    #[test]
    fn rekey_leaves_payload_without_id_alone() {
        let mut record = EntityRecord::new(EntityType::Flashcard, "a", Payload::new(json!([1, 2])));
        record.rekey("b");
        assert_eq!(record.key(), EntityKey::new(EntityType::Flashcard, "b"));
        assert_eq!(record.payload.as_value(), &json!([1, 2]));
    }
}
