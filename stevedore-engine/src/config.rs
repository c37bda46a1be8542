//! Executor configuration.

use std::time::Duration;

use stevedore_core::limits;

use crate::error::{EngineError, EngineResult};

/// Retry budgets for the two per-operation retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum retry attempts for throttled (429) operations.
    pub max_throttle_attempts: u32,
    /// Cumulative wait budget across throttle retries.
    pub max_throttle_wait: Duration,
    /// Maximum retry attempts for stale-routing (410) operations.
    pub max_range_gone_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_throttle_attempts: limits::DEFAULT_MAX_THROTTLE_ATTEMPTS,
            max_throttle_wait: limits::DEFAULT_MAX_THROTTLE_WAIT,
            max_range_gone_attempts: limits::MAX_RANGE_GONE_ATTEMPTS,
        }
    }
}

impl RetryConfig {
    /// Sets the throttle attempt budget.
    #[must_use]
    pub const fn with_max_throttle_attempts(mut self, attempts: u32) -> Self {
        self.max_throttle_attempts = attempts;
        self
    }

    /// Sets the cumulative throttle wait budget.
    #[must_use]
    pub const fn with_max_throttle_wait(mut self, wait: Duration) -> Self {
        self.max_throttle_wait = wait;
        self
    }
}

/// Configuration for the bulk executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Hard cap on operations per server batch.
    pub max_batch_operations: usize,
    /// Hard cap on batch body bytes.
    pub max_batch_body_bytes: usize,
    /// Upper bound on how long an operation waits in a non-full buffer.
    pub dispatch_interval: Duration,
    /// Retry budgets.
    pub retry: RetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_batch_operations: limits::DEFAULT_MAX_BATCH_OPERATIONS,
            max_batch_body_bytes: limits::DEFAULT_MAX_BATCH_BODY_BYTES,
            dispatch_interval: limits::DEFAULT_DISPATCH_INTERVAL,
            retry: RetryConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Sets the per-batch operation cap.
    #[must_use]
    pub const fn with_max_batch_operations(mut self, count: usize) -> Self {
        self.max_batch_operations = count;
        self
    }

    /// Sets the per-batch body byte cap.
    #[must_use]
    pub const fn with_max_batch_body_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_body_bytes = bytes;
        self
    }

    /// Sets the dispatch deadline interval.
    #[must_use]
    pub const fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Sets the retry budgets.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Creates a configuration with small bounds suitable for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_batch_operations: 4,
            max_batch_body_bytes: 4096,
            dispatch_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidUsage`] if any bound is out of range.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_batch_operations == 0 {
            return Err(EngineError::InvalidUsage {
                reason: "max_batch_operations must be at least 1".to_string(),
            });
        }
        if self.max_batch_body_bytes == 0 {
            return Err(EngineError::InvalidUsage {
                reason: "max_batch_body_bytes must be at least 1".to_string(),
            });
        }
        if self.dispatch_interval < limits::TIMER_RESOLUTION_FLOOR {
            return Err(EngineError::InvalidUsage {
                reason: format!(
                    "dispatch_interval must be at least {}s",
                    limits::TIMER_RESOLUTION_FLOOR.as_secs()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ExecutorConfig::default().validate().is_ok());
        assert!(ExecutorConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_operations_rejected() {
        let config = ExecutorConfig::default().with_max_batch_operations(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_second_dispatch_interval_rejected() {
        let config = ExecutorConfig::default().with_dispatch_interval(Duration::from_millis(100));
        assert!(config.validate().is_err());
    }
}
