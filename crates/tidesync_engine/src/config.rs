//! Configuration for adapters and the coordinator.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Adapter tunables.
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of retries after the first attempt.
    pub retry_count: u32,
    /// Base delay between retries; attempt `n` waits `n * retry_delay`.
    /// Also the cool-down before an entity type in `Error` may sync again.
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// Per-call timeout.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Cache remote version probes.
    pub enable_cache: bool,
    /// Lifetime of cached version probes.
    #[serde(with = "duration_millis")]
    pub cache_expiry: Duration,
    /// Maximum entity types synced concurrently.
    pub max_concurrent_requests: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            enable_cache: true,
            cache_expiry: Duration::from_secs(300),
            max_concurrent_requests: 4,
        }
    }
}

impl SyncConfig {
    /// Sets the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables the version probe cache.
    pub fn with_cache(mut self, enabled: bool, expiry: Duration) -> Self {
        self.enable_cache = enabled;
        self.cache_expiry = expiry;
        self
    }

    /// Sets the concurrency bound.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a zero timeout or zero concurrency.
    pub fn validate(&self) -> SyncResult<()> {
        if self.timeout.is_zero() {
            return Err(SyncError::Config("timeout must be greater than zero".into()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(SyncError::Config(
                "max_concurrent_requests must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Delay before retry `attempt` (1-based): `retry_delay * attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// Coordinator tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Maximum pull pages per cycle; remaining pages wait for the next cycle.
    pub max_pages_per_cycle: usize,
    /// Items per `batch_push` call.
    pub push_batch_size: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_pages_per_cycle: 64,
            push_batch_size: 50,
        }
    }
}

impl CoordinatorOptions {
    /// Sets the page budget.
    pub fn with_max_pages_per_cycle(mut self, pages: usize) -> Self {
        self.max_pages_per_cycle = pages.max(1);
        self
    }

    /// Sets the push chunk size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size.max(1);
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
