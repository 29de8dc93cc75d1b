//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing or encoding protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity type name not recognised.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Operation kind name not recognised.
    #[error("unknown operation kind: {0}")]
    UnknownOperationKind(String),
}
