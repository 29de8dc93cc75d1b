//! Batch request handling.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ReplayKey, ServerStore, StoreState, StoredEntity};
use cardsync_sync_protocol::{
    BatchRequest, BatchResponse, ConflictData, EntityKey, OperationKind, OperationResult,
    ResultStatus, WireOperation,
};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Entity store (shared across all handlers).
    pub store: Arc<ServerStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        Self { config, store }
    }
}

/// Applies batches to the store.
///
/// Version rules for an operation based on `clientVersion`:
/// - equal to the server version: applied, version + 1;
/// - lower: rejected with the server's state;
/// - higher: error, the client is ahead of the server;
/// - entity unknown: creates and updates are applied as upserts, deletes
///   are accepted as no-ops.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a batch request.
    ///
    /// The batch is applied under one lock, in order.
    pub fn handle_batch(&self, request: BatchRequest) -> ServerResult<BatchResponse> {
        if request.user_id.trim().is_empty() {
            return Err(ServerError::InvalidRequest("missing userId".into()));
        }
        let max = self.context.config.max_batch;
        if request.operations.len() > max {
            return Err(ServerError::BatchTooLarge {
                count: request.operations.len(),
                max,
            });
        }

        let mut state = self.context.store.lock();
        let results = request
            .operations
            .iter()
            .map(|op| self.apply(&mut state, &request, op))
            .collect();
        Ok(BatchResponse::new(results))
    }

    fn apply(
        &self,
        state: &mut StoreState,
        request: &BatchRequest,
        op: &WireOperation,
    ) -> OperationResult {
        let replay = ReplayKey {
            user_id: request.user_id.clone(),
            device_id: request.device_id.clone(),
            op_id: op.op_id,
        };
        if let Some(previous) = state.applied.get(&replay) {
            tracing::debug!(op_id = op.op_id, entity = %op.key(), "replayed operation");
            return previous.clone();
        }

        let result = self.apply_new(state, &request.user_id, op);
        tracing::trace!(
            op_id = op.op_id,
            entity = %op.key(),
            status = ?result.status,
            "applied operation"
        );
        if result.status != ResultStatus::Error {
            let window = self.context.config.replay_window;
            state.applied.record(replay, result.clone(), window);
        }
        result
    }

    fn apply_new(
        &self,
        state: &mut StoreState,
        user_id: &str,
        op: &WireOperation,
    ) -> OperationResult {
        if op.operation_kind.requires_payload() {
            match &op.payload {
                None => return OperationResult::error(&op.entity_id, "missing payload"),
                Some(payload) if payload.encoded_len() > self.context.config.max_payload_size => {
                    return OperationResult::error(&op.entity_id, "payload too large");
                }
                Some(_) => {}
            }
        }

        let key = op.key();
        let Some(existing) = state.entities.get_mut(&key) else {
            return self.apply_unknown(state, user_id, op);
        };

        if existing.owner_id != user_id {
            return OperationResult::error(&op.entity_id, "entity belongs to another user");
        }
        if op.client_version < existing.version {
            return OperationResult::rejected(
                &op.entity_id,
                ConflictData {
                    remote_version: existing.version,
                    remote_payload: existing.payload.clone(),
                },
            );
        }
        if op.client_version > existing.version {
            return OperationResult::error(
                &op.entity_id,
                format!(
                    "client version {} is ahead of server version {}",
                    op.client_version, existing.version
                ),
            );
        }

        if op.operation_kind == OperationKind::Delete && existing.is_deleted() {
            return OperationResult::accepted(&op.entity_id, existing.version);
        }
        existing.version += 1;
        existing.payload = match op.operation_kind {
            OperationKind::Delete => None,
            OperationKind::Create | OperationKind::Update => op.payload.clone(),
        };
        OperationResult::accepted(&op.entity_id, existing.version)
    }

    fn apply_unknown(
        &self,
        state: &mut StoreState,
        user_id: &str,
        op: &WireOperation,
    ) -> OperationResult {
        if op.operation_kind == OperationKind::Delete {
            return OperationResult::accepted(&op.entity_id, op.client_version);
        }

        let assign = self.context.config.assign_ids
            && op.operation_kind == OperationKind::Create
            && op.client_version == 0;
        let (id, payload) = if assign {
            let id = uuid::Uuid::new_v4().to_string();
            let payload = op.payload.clone().map(|p| p.with_id(&id));
            (id, payload)
        } else {
            (op.entity_id.clone(), op.payload.clone())
        };

        let version = op.client_version + 1;
        state.entities.insert(
            EntityKey::new(op.entity_type, id.clone()),
            StoredEntity {
                owner_id: user_id.to_string(),
                version,
                payload,
            },
        );

        let result = OperationResult::accepted(&op.entity_id, version);
        if assign {
            result.with_canonical_id(id)
        } else {
            result
        }
    }
}
