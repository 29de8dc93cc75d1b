//! Transport layer abstraction for batch submission.

use crate::error::{SyncError, SyncResult};
use cardsync_sync_protocol::{BatchRequest, BatchResponse, OperationResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A sync transport delivers batches to the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
pub trait SyncTransport: Send + Sync {
    /// Submits one batch and waits for the per-operation results.
    ///
    /// Implementations return `Connectivity` when the server cannot be
    /// reached and `Timeout` when no answer arrives within `timeout`.
    fn submit_batch(&self, request: &BatchRequest, timeout: Duration) -> SyncResult<BatchResponse>;

    /// Checks if the transport can currently reach the server.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

/// One scripted answer of a [`MockTransport`].
#[derive(Debug)]
pub enum MockReply {
    /// Return this response.
    Respond(BatchResponse),
    /// Fail the submission with this error.
    Fail(SyncError),
}

type SubmitHook = Box<dyn Fn(&BatchRequest) + Send + Sync>;

/// A scripted transport for testing.
///
/// Replies are consumed in order; once the script is empty every
/// operation is accepted with version `client_version + 1`.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<BatchRequest>>,
    on_submit: Mutex<Option<SubmitHook>>,
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: BatchResponse) {
        self.replies.lock().push_back(MockReply::Respond(response));
    }

    /// Queues an error.
    pub fn push_error(&self, error: SyncError) {
        self.replies.lock().push_back(MockReply::Fail(error));
    }

    /// Runs `hook` inside every submission, before the reply is produced.
    pub fn on_submit(&self, hook: impl Fn(&BatchRequest) + Send + Sync + 'static) {
        *self.on_submit.lock() = Some(Box::new(hook));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().clone()
    }

    /// Number of submissions received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn accept_all(request: &BatchRequest) -> BatchResponse {
        BatchResponse::new(
            request
                .operations
                .iter()
                .map(|op| OperationResult::accepted(op.entity_id.clone(), op.client_version + 1))
                .collect(),
        )
    }
}

impl SyncTransport for MockTransport {
    fn submit_batch(
        &self,
        request: &BatchRequest,
        _timeout: Duration,
    ) -> SyncResult<BatchResponse> {
        if !self.is_connected() {
            return Err(SyncError::Connectivity("mock transport disconnected".into()));
        }
        self.requests.lock().push(request.clone());
        if let Some(hook) = self.on_submit.lock().as_ref() {
            hook(request);
        }

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(error)) => Err(error),
            None => Ok(Self::accept_all(request)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
