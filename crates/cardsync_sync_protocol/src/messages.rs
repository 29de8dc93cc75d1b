//! `POST /sync/batch` request and response messages.
//!
//! Messages are JSON with camelCase keys, the format spoken by the app
//! backend. Results are positional: `results[i]` answers `operations[i]`.

use crate::entity::{EntityKey, EntityType, OperationKind};
use crate::error::ProtocolResult;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};

/// Path of the batch endpoint.
pub const BATCH_ENDPOINT: &str = "/sync/batch";

/// One mutation sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    /// Client-side operation id; lets the server recognise replays.
    pub op_id: u64,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity id.
    pub entity_id: String,
    /// Create, update or delete.
    pub operation_kind: OperationKind,
    /// Entity snapshot (absent for deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Server version the mutation was based on (0 if never synced).
    pub client_version: u64,
}

impl WireOperation {
    /// Key of the entity this operation targets.
    #[must_use]
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id.clone())
    }
}

/// Body of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Account that owns every entity in the batch.
    pub user_id: String,
    /// Installation that produced the operations. Operation ids are only
    /// unique per device.
    #[serde(default)]
    pub device_id: String,
    /// Operations, in the order they should be applied.
    pub operations: Vec<WireOperation>,
}

impl BatchRequest {
    /// Creates a new batch request.
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        operations: Vec<WireOperation>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            operations,
        }
    }

    /// Encodes to JSON bytes.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Per-operation outcome reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Applied on the server.
    Accepted,
    /// Not applied because the server holds a newer version.
    Rejected,
    /// Not applied because of a transient server-side failure.
    Error,
}

/// Server state attached to a rejected operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    /// Version the server currently holds.
    pub remote_version: u64,
    /// Server snapshot, `None` if the entity was deleted remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_payload: Option<Payload>,
}

/// Result for one submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    /// Entity id as sent by the client.
    pub entity_id: String,
    /// Outcome.
    pub status: ResultStatus,
    /// New server version (accepted operations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// Server-assigned id when it differs from the client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
    /// Remote state for rejected operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_data: Option<ConflictData>,
    /// Human-readable reason for rejections and errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResult {
    /// An accepted result.
    pub fn accepted(entity_id: impl Into<String>, server_version: u64) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: ResultStatus::Accepted,
            server_version: Some(server_version),
            canonical_id: None,
            conflict_data: None,
            message: None,
        }
    }

    /// A rejected result carrying the server's state.
    pub fn rejected(entity_id: impl Into<String>, conflict: ConflictData) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: ResultStatus::Rejected,
            server_version: Some(conflict.remote_version),
            canonical_id: None,
            conflict_data: Some(conflict),
            message: None,
        }
    }

    /// An error result.
    pub fn error(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: ResultStatus::Error,
            server_version: None,
            canonical_id: None,
            conflict_data: None,
            message: Some(message.into()),
        }
    }

    /// Sets the canonical id.
    #[must_use]
    pub fn with_canonical_id(mut self, id: impl Into<String>) -> Self {
        self.canonical_id = Some(id.into());
        self
    }
}

/// Body of a batch response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// One result per submitted operation, in submission order.
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(results: Vec<OperationResult>) -> Self {
        Self { results }
    }

    /// Encodes to JSON bytes.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
