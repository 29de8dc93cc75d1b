//! Entity and operation identifiers.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of synchronizable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A built-in vocabulary flashcard.
    Flashcard,
    /// Result of a finished quiz.
    QuizResult,
    /// Result of a finished game round.
    GameResult,
    /// Spaced-repetition schedule of one card.
    SpacedRepetition,
    /// A user-created deck.
    CustomDeck,
    /// A card inside a user-created deck.
    CustomFlashcard,
}

impl EntityType {
    /// Every entity type, in a stable order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Flashcard,
        EntityType::QuizResult,
        EntityType::GameResult,
        EntityType::SpacedRepetition,
        EntityType::CustomDeck,
        EntityType::CustomFlashcard,
    ];

    /// The wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Flashcard => "flashcard",
            EntityType::QuizResult => "quiz_result",
            EntityType::GameResult => "game_result",
            EntityType::SpacedRepetition => "spaced_repetition",
            EntityType::CustomDeck => "custom_deck",
            EntityType::CustomFlashcard => "custom_flashcard",
        }
    }

    /// Returns true for types whose history is append-only.
    #[must_use]
    pub fn is_history(&self) -> bool {
        matches!(self, EntityType::QuizResult | EntityType::GameResult)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownEntityType(s.to_string()))
    }
}

/// Kind of mutation recorded for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Entity was created locally.
    Create,
    /// Entity was modified locally.
    Update,
    /// Entity was deleted locally.
    Delete,
}

impl OperationKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Returns true if operations of this kind carry an entity snapshot.
    #[must_use]
    pub fn requires_payload(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(ProtocolError::UnknownOperationKind(other.to_string())),
        }
    }
}

/// Identity of one entity: its type plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id, unique within its type.
    pub entity_id: String,
}

impl EntityKey {
    /// Creates a new key.
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_names_parse_back() {
        for entity_type in EntityType::ALL {
            assert_eq!(entity_type.as_str().parse::<EntityType>().unwrap(), entity_type);
        }
        assert!(matches!(
            "deck".parse::<EntityType>(),
            Err(ProtocolError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn serde_names_match_wire_names() {
        let json = serde_json::to_string(&EntityType::SpacedRepetition).unwrap();
        assert_eq!(json, "\"spaced_repetition\"");
        let json = serde_json::to_string(&OperationKind::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
    }

    #[test]
    fn operation_kind_parsing() {
        assert_eq!("update".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert!("upsert".parse::<OperationKind>().is_err());
        assert!(OperationKind::Create.requires_payload());
        assert!(!OperationKind::Delete.requires_payload());
    }

    #[test]
    fn entity_key_display() {
        let key = EntityKey::new(EntityType::Flashcard, "42");
        assert_eq!(key.to_string(), "flashcard/42");
    }
}
