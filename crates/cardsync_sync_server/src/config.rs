//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum operations per batch request.
    pub max_batch: usize,
    /// Whether creates of new entities get a server-assigned id.
    pub assign_ids: bool,
    /// Maximum encoded payload size in bytes.
    pub max_payload_size: usize,
    /// Applied operation results remembered per device for replays.
    pub replay_window: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_batch: 100,
            assign_ids: false,
            max_payload_size: 256 * 1024,
            replay_window: 1024,
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = max;
        self
    }

    /// Enables server-assigned ids for new entities.
    pub fn with_assigned_ids(mut self) -> Self {
        self.assign_ids = true;
        self
    }

    /// Sets the maximum payload size.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Sets how many applied results are kept per device.
    pub fn with_replay_window(mut self, window: usize) -> Self {
        self.replay_window = window.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
