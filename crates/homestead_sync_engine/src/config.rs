//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID (unique per device).
    pub device_id: String,
    /// Owner identity presented to the replica.
    pub owner: String,
    /// Optional owner token.
    pub token: Option<Vec<u8>>,
    /// Server URL.
    pub server_url: String,
    /// Soft page size for pull operations.
    pub pull_batch_size: u32,
    /// Maximum rows per push request.
    pub push_batch_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Timeout for each transport call.
    pub timeout: Duration,
    /// Drop `done` outbox items at the end of every cycle.
    pub compact_after_cycle: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(
        device_id: impl Into<String>,
        owner: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            owner: owner.into(),
            token: None,
            server_url: server_url.into(),
            pull_batch_size: 100,
            push_batch_size: 50,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            compact_after_cycle: false,
        }
    }

    /// Sets the owner token.
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables dropping `done` items after each cycle.
    pub fn with_compaction(mut self, enabled: bool) -> Self {
        self.compact_after_cycle = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("local-device", "local", "")
    }
}

/// Backoff policy for outbox items that hit transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which an item is marked `failed`.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the default curve.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that fails an item on its first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    ///
    /// Values below 1.0 (and NaN) are raised to 1.0, a constant delay.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay after `attempt` failures (0 means no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = self.backoff_multiplier.max(1.0);
        let base_delay = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        // NaN from 0 * inf falls back to the cap.
        let delay_secs = if base_delay.is_nan() {
            max_secs
        } else {
            base_delay.min(max_secs)
        };

        let delay_secs = if self.add_jitter && delay_secs > 0.0 {
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }

    /// Returns true once `attempts` reaches the ceiling.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Configuration for the background sync scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the timer trigger.
    pub interval: Duration,
    /// Run a cycle as soon as the scheduler starts.
    pub sync_on_start: bool,
}

impl SchedulerConfig {
    /// Creates a scheduler configuration.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sync_on_start: true,
        }
    }

    /// Sets whether to sync on start.
    pub fn with_sync_on_start(mut self, enabled: bool) -> Self {
        self.sync_on_start = enabled;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}
