//! Configuration for the sync engine.

use std::time::Duration;

pub use cardsync_core::RetryConfig;

/// Configuration for sync operations.
///
/// Retry limits and backoff live in [`RetryConfig`], which the queue
/// applies when an operation fails; it is set through
/// `cardsync_core::StoreConfig::retry`.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Account that owns the synchronized data.
    pub user_id: String,
    /// Installation id, unique per device.
    pub device_id: String,
    /// Server URL.
    pub server_url: String,
    /// Maximum operations per `/sync/batch` request.
    pub batch_size: usize,
    /// Timeout for one batch request.
    pub request_timeout: Duration,
    /// How long confirmed operations are kept before being purged.
    pub confirmed_retention: Duration,
    /// Interval for automatic sync.
    pub sync_interval: Option<Duration>,
    /// Upper bound on cycles run by one `drain_all`.
    pub max_cycles: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration with a random device id.
    pub fn new(user_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: uuid::Uuid::new_v4().to_string(),
            server_url: server_url.into(),
            batch_size: 50,
            request_timeout: Duration::from_secs(30),
            confirmed_retention: Duration::from_secs(24 * 60 * 60),
            sync_interval: None,
            max_cycles: 1_000,
        }
    }

    /// Sets the device id.
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retention window for confirmed operations.
    pub fn with_confirmed_retention(mut self, retention: Duration) -> Self {
        self.confirmed_retention = retention;
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the cycle limit of `drain_all`.
    pub fn with_max_cycles(mut self, cycles: usize) -> Self {
        self.max_cycles = cycles;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
