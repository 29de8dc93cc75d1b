//! Store configuration.

use std::time::Duration;

/// Owner assigned to records that were written without one.
pub const DEFAULT_OWNER: &str = "local";

/// Configuration for opening a local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Largest accepted payload, in bytes of compact JSON.
    pub max_payload_size: usize,

    /// Journal records tolerated before a compaction is attempted.
    pub compaction_threshold: usize,

    /// Account that owns the records written through this store.
    pub owner_id: String,

    /// Retry behaviour for operations that fail on the server.
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            max_payload_size: 256 * 1024,
            compaction_threshold: 1024,
            owner_id: DEFAULT_OWNER.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync on commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the payload size limit.
    #[must_use]
    pub const fn max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub const fn compaction_threshold(mut self, records: usize) -> Self {
        self.compaction_threshold = records;
        self
    }

    /// Sets the owning account.
    #[must_use]
    pub fn owner_id(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = owner.into();
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry configuration for failed operations.
///
/// An operation that keeps failing with application errors waits
/// `initial_delay * multiplier^(n-1)` after its n-th failure, capped at
/// `max_delay`, and becomes terminally failed after `max_attempts` failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failures tolerated before the operation is marked failed.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Spread delays by up to a quarter so many devices don't retry in step.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            add_jitter: false,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with no delays, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Calculates the delay after the given failure (1-based).
    ///
    /// `seed` only matters when jitter is enabled; the queue passes the
    /// operation id so retries of different operations spread out.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, seed: u64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.add_jitter {
            // Up to 25% extra, derived from the seed.
            let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17);
            let fraction = (mixed % 1000) as f64 / 4000.0;
            (capped * (1.0 + fraction)).min(self.max_delay.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Returns true if another attempt is allowed after `failures` failures.
    #[must_use]
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_store_config() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.owner_id, DEFAULT_OWNER);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .max_payload_size(16)
            .owner_id("user-1");

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.max_payload_size, 16);
        assert_eq!(config.owner_id, "user-1");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0, 1), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1, 1), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2, 1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(3, 1), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(10, 1), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig {
            add_jitter: true,
            ..RetryConfig::default()
        };
        for seed in 0..50 {
            let delay = retry.delay_for_attempt(2, seed);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn should_retry_counts_failures() {
        let retry = RetryConfig::immediate(3);
        assert!(retry.should_retry(2));
        assert!(!retry.should_retry(3));
    }
}
