//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that fail a whole request.
///
/// Problems with a single operation are reported in its result instead.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Too many operations in one batch.
    #[error("batch too large: {count} > {max}")]
    BatchTooLarge {
        /// Operations in the request.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No such endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server is switched off; clients see a refused connection.
    #[error("server unavailable")]
    Unavailable,

    /// Injected or unexpected server failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::BatchTooLarge { .. }
                | ServerError::NotFound(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP status for errors that still produce a response.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::NotFound(_) => 404,
            ServerError::InvalidRequest(_) | ServerError::BatchTooLarge { .. } => 400,
            ServerError::Unavailable => 503,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<cardsync_sync_protocol::ProtocolError> for ServerError {
    fn from(e: cardsync_sync_protocol::ProtocolError) -> Self {
        ServerError::InvalidRequest(e.to_string())
    }
}
