//! Error types for the sync engine.

use cardsync_sync_protocol::EntityKey;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed operation; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Server unreachable; retried without penalty.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Server refused or failed the request; retried with backoff.
    #[error("application error: {0}")]
    Application(String),

    /// A conflict the configured policy leaves to the caller.
    #[error("unresolved conflict on {0}")]
    UnresolvedConflict(EntityKey),

    /// Request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid message format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store error.
    #[error("local store error: {0}")]
    Core(#[from] cardsync_core::CoreError),

    /// The running cycle this call waited for failed with this message.
    #[error("joined drain cycle failed: {0}")]
    Joined(String),
}

impl From<cardsync_sync_protocol::ProtocolError> for SyncError {
    fn from(err: cardsync_sync_protocol::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl SyncError {
    /// Returns true for errors that pause syncing until the network is back.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity(_))
    }

    /// Returns true if the failed operations can be sent again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_) | SyncError::Application(_) | SyncError::Timeout
        )
    }
}
