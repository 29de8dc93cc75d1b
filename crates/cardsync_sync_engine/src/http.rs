//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so the app can plug in
//! whatever stack the platform provides. Bodies are JSON.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use cardsync_sync_protocol::{BatchRequest, BatchResponse, BATCH_ENDPOINT};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response.
    #[must_use]
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to get any response at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// Could not connect.
    #[error("connection failed: {0}")]
    Connect(String),
    /// No response within the timeout.
    #[error("request timed out")]
    Timeout,
    /// Connection broke mid-request.
    #[error("I/O error: {0}")]
    Io(String),
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<HttpResponse, HttpError>;

    /// Checks if the client believes the network is available.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based sync transport speaking `POST {base}/sync/batch`.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    closed: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            closed: AtomicBool::new(false),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn fail(&self, error: SyncError) -> SyncError {
        *self.last_error.write() = Some(error.to_string());
        error
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn submit_batch(&self, request: &BatchRequest, timeout: Duration) -> SyncResult<BatchResponse> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity("transport closed".into()));
        }

        let body = request.to_json()?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), BATCH_ENDPOINT);

        let response = match self.client.post(&url, body, timeout) {
            Ok(response) => response,
            Err(HttpError::Timeout) => return Err(self.fail(SyncError::Timeout)),
            Err(e @ (HttpError::Connect(_) | HttpError::Io(_))) => {
                return Err(self.fail(SyncError::Connectivity(e.to_string())));
            }
        };

        if !response.is_success() {
            let detail = String::from_utf8_lossy(&response.body).into_owned();
            let message = format!("server returned {}: {detail}", response.status);
            let error = if response.status >= 500 {
                SyncError::Application(message)
            } else {
                SyncError::Protocol(message)
            };
            return Err(self.fail(error));
        }

        *self.last_error.write() = None;
        BatchResponse::from_json(&response.body).map_err(|e| self.fail(e.into()))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<HttpResponse, HttpError>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }
}
