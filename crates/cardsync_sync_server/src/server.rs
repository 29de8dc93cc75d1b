//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::{ServerStore, StoredEntity};
use cardsync_sync_protocol::{BatchRequest, BatchResponse, EntityType, BATCH_ENDPOINT};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The reference sync server.
///
/// Holds the authoritative copy of every entity in memory and answers
/// `POST /sync/batch`. Two switches simulate a misbehaving backend: an
/// outage (requests fail as if the connection was refused) and a number of
/// injected 500 responses.
///
/// # Example
///
/// ```
/// use cardsync_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let body = br#"{"userId":"u1","deviceId":"d1","operations":[]}"#;
/// let (status, _) = server.handle_post("/sync/batch", body).unwrap();
/// assert_eq!(status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    available: AtomicBool,
    injected_failures: AtomicUsize,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(ServerStore::new()))
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            available: AtomicBool::new(true),
            injected_failures: AtomicUsize::new(0),
        }
    }

    /// Handles a decoded batch request.
    pub fn handle_batch(&self, request: BatchRequest) -> ServerResult<BatchResponse> {
        if !self.is_available() {
            return Err(ServerError::Unavailable);
        }
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ServerError::Internal("injected failure".into()));
        }

        let response = self.handler.handle_batch(request)?;
        tracing::debug!(results = response.results.len(), "batch handled");
        Ok(response)
    }

    /// Handles a raw POST, returning the status code and body.
    ///
    /// Only an outage is reported as `Err`; every other failure becomes an
    /// HTTP error response.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<(u16, Vec<u8>)> {
        if !self.is_available() {
            return Err(ServerError::Unavailable);
        }

        let outcome = if path == BATCH_ENDPOINT {
            BatchRequest::from_json(body)
                .map_err(ServerError::from)
                .and_then(|request| self.handle_batch(request))
        } else {
            Err(ServerError::NotFound(path.to_string()))
        };

        match outcome {
            Ok(response) => {
                let body = response
                    .to_json()
                    .map_err(|e| ServerError::Internal(e.to_string()))?;
                Ok((200, body))
            }
            Err(ServerError::Unavailable) => Err(ServerError::Unavailable),
            Err(e) => {
                tracing::warn!(path, error = %e, "request failed");
                Ok((e.status_code(), e.to_string().into_bytes()))
            }
        }
    }

    /// Turns the outage switch off (`false`) or on again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns false during a simulated outage.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Makes the next `count` batches fail with a 500.
    pub fn fail_next(&self, count: usize) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Gets an entity, tombstones included.
    pub fn entity(&self, entity_type: EntityType, id: &str) -> Option<StoredEntity> {
        self.context.store.get(entity_type, id)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.context.store.len()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.context.store
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}
