//! Opaque entity snapshots.

use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A serialized snapshot of an entity.
///
/// The queue and the engine never look inside a payload; only the conflict
/// policy and the typed repositories do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(serde_json::Value);

impl Payload {
    /// Wraps a JSON value.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Serializes a typed entity.
    pub fn from_entity<T: Serialize>(entity: &T) -> ProtocolResult<Self> {
        Ok(Self(serde_json::to_value(entity)?))
    }

    /// Deserializes into a typed entity.
    pub fn to_entity<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Borrows the JSON value.
    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the payload.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Rewrites the top-level `id` field, if present, to `id`.
    #[must_use]
    pub fn with_id(self, id: &str) -> Self {
        let mut value = self.0;
        if let Some(object) = value.as_object_mut() {
            if object.contains_key("id") {
                object.insert("id".into(), serde_json::Value::String(id.to_string()));
            }
        }
        Self(value)
    }

    /// Size of the compact JSON encoding in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Card {
        id: String,
        front: String,
    }

    #[test]
    fn typed_entity_through_payload() {
        let card = Card {
            id: "42".into(),
            front: "hola".into(),
        };
        let payload = Payload::from_entity(&card).unwrap();
        assert_eq!(payload.as_value(), &json!({"id": "42", "front": "hola"}));
        assert_eq!(payload.to_entity::<Card>().unwrap(), card);
    }

    #[test]
    fn with_id_only_touches_existing_id() {
        let payload = Payload::new(json!({"id": "tmp", "front": "hola"})).with_id("42");
        assert_eq!(payload.as_value(), &json!({"id": "42", "front": "hola"}));

        let payload = Payload::new(json!({"front": "hola"})).with_id("42");
        assert_eq!(payload.as_value(), &json!({"front": "hola"}));
    }

    #[test]
    fn encoded_len_counts_compact_json() {
        let payload = Payload::new(json!({"a": 1}));
        assert_eq!(payload.encoded_len(), 7);
    }
}
