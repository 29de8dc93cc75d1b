//! Error types for CardSync core.

use crate::queue::OperationStatus;
use cardsync_sync_protocol::EntityKey;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the local store and the operation queue.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cardsync_storage::StorageError),

    /// Entity type or operation kind could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] cardsync_sync_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded for the journal.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A journal record could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Input rejected before anything was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// No operation with this id is queued.
    #[error("operation not found: {0}")]
    OperationNotFound(u64),

    /// The operation is not in a state that allows the requested change.
    #[error("operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Operation id.
        id: u64,
        /// Current status.
        from: OperationStatus,
        /// Requested status.
        to: OperationStatus,
    },

    /// Entity not present in the local store.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityKey),

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// Store directory missing or not a directory.
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// The store was written by a newer release.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema {
        /// Version found on disk.
        found: u64,
        /// Highest version this build understands.
        supported: u64,
    },

    /// A migration failed.
    #[error("migration {version} failed: {message}")]
    MigrationFailed {
        /// Migration version.
        version: u64,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a migration error.
    pub fn migration_failed(version: u64, message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            version,
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller's input.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Protocol(_))
    }
}
