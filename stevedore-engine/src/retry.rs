//! Per-operation retry policies.
//!
//! Two policies compose, evaluated outer to inner:
//!
//! 1. **Routing-stale**: a 410 with a split/merge/migration substatus means
//!    the operation's cached range no longer exists. The operation rebatches
//!    after a forced routing-map refresh, at most
//!    [`RetryConfig::max_range_gone_attempts`] times.
//! 2. **Throttle**: a 429 rebatches after the server's `retry_after`
//!    (default zero), bounded by an attempt count and a cumulative wait
//!    budget.
//!
//! State is per-operation and carried across rebatches; exhausted budgets
//! surface the server result to the caller unchanged.

use std::time::Duration;

use stevedore_core::OperationResult;

use crate::config::RetryConfig;

/// What to do with a non-success per-operation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resolve the caller's future with the result as-is.
    Surface,
    /// Rebatch the operation after `delay`.
    Retry {
        /// Wait before rebatching.
        delay: Duration,
        /// Force a routing-map refresh before re-resolving the range.
        refresh_routing: bool,
    },
}

/// Retry state for one operation.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    throttle: ThrottleState,
    range_gone: RangeGoneState,
}

#[derive(Debug, Clone, Default)]
struct ThrottleState {
    attempts: u32,
    waited: Duration,
}

#[derive(Debug, Clone, Default)]
struct RangeGoneState {
    attempts: u32,
}

impl RetryState {
    /// Decides the disposition of a per-operation server result.
    pub fn decide(&mut self, result: &OperationResult, config: &RetryConfig) -> RetryDecision {
        if result.status.is_gone() && result.sub_status.is_routing_stale() {
            return self.decide_routing_stale(config);
        }

        if result.status.is_throttled() {
            let delay = result.retry_after.unwrap_or(Duration::ZERO);
            if self.throttle.attempts < config.max_throttle_attempts
                && self.throttle.waited + delay <= config.max_throttle_wait
            {
                self.throttle.attempts += 1;
                self.throttle.waited += delay;
                return RetryDecision::Retry {
                    delay,
                    refresh_routing: false,
                };
            }
            return RetryDecision::Surface;
        }

        RetryDecision::Surface
    }

    /// Decides whether a stale-routing signal (410 or a whole-batch
    /// transport failure) still has retry budget.
    pub fn decide_routing_stale(&mut self, config: &RetryConfig) -> RetryDecision {
        if self.range_gone.attempts < config.max_range_gone_attempts {
            self.range_gone.attempts += 1;
            RetryDecision::Retry {
                delay: Duration::ZERO,
                refresh_routing: true,
            }
        } else {
            RetryDecision::Surface
        }
    }

    /// Returns the throttle attempts consumed so far.
    #[must_use]
    pub const fn throttle_attempts(&self) -> u32 {
        self.throttle.attempts
    }

    /// Returns the routing-stale attempts consumed so far.
    #[must_use]
    pub const fn range_gone_attempts(&self) -> u32 {
        self.range_gone.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_core::{StatusCode, SubStatus};

    fn config() -> RetryConfig {
        RetryConfig {
            max_throttle_attempts: 3,
            max_throttle_wait: Duration::from_secs(10),
            max_range_gone_attempts: 3,
        }
    }

    fn throttled(retry_after: Option<Duration>) -> OperationResult {
        let result = OperationResult::with_status(StatusCode::TOO_MANY_REQUESTS);
        match retry_after {
            Some(delay) => result.with_retry_after(delay),
            None => result,
        }
    }

    #[test]
    fn test_throttle_retries_until_attempts_exhausted() {
        let mut state = RetryState::default();
        let config = config();
        let result = throttled(Some(Duration::from_millis(10)));

        for _ in 0..3 {
            assert!(matches!(
                state.decide(&result, &config),
                RetryDecision::Retry {
                    refresh_routing: false,
                    ..
                }
            ));
        }
        assert_eq!(state.decide(&result, &config), RetryDecision::Surface);
        assert_eq!(state.throttle_attempts(), 3);
    }

    #[test]
    fn test_throttle_default_delay_is_zero() {
        let mut state = RetryState::default();
        let decision = state.decide(&throttled(None), &config());
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::ZERO,
                refresh_routing: false,
            }
        );
    }

    #[test]
    fn test_throttle_cumulative_wait_budget() {
        let mut state = RetryState::default();
        let config = RetryConfig {
            max_throttle_attempts: 10,
            max_throttle_wait: Duration::from_secs(1),
            max_range_gone_attempts: 3,
        };

        // 600ms fits; a second 600ms would exceed the 1s budget.
        let result = throttled(Some(Duration::from_millis(600)));
        assert!(matches!(
            state.decide(&result, &config),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(state.decide(&result, &config), RetryDecision::Surface);
    }

    #[test]
    fn test_range_gone_forces_routing_refresh() {
        let mut state = RetryState::default();
        let result = OperationResult::with_status(StatusCode::GONE)
            .with_sub_status(SubStatus::PARTITION_KEY_RANGE_GONE);

        let decision = state.decide(&result, &config());
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::ZERO,
                refresh_routing: true,
            }
        );
        assert_eq!(state.range_gone_attempts(), 1);
    }

    #[test]
    fn test_range_gone_budget_is_bounded() {
        let mut state = RetryState::default();
        let result = OperationResult::with_status(StatusCode::GONE)
            .with_sub_status(SubStatus::COMPLETING_SPLIT);
        let config = config();

        for _ in 0..3 {
            assert!(matches!(
                state.decide(&result, &config),
                RetryDecision::Retry { .. }
            ));
        }
        assert_eq!(state.decide(&result, &config), RetryDecision::Surface);
    }

    #[test]
    fn test_bare_gone_without_substatus_surfaces() {
        let mut state = RetryState::default();
        // A 410 with no qualifying substatus is a terminal result, not a
        // routing signal.
        let result = OperationResult::with_status(StatusCode::GONE);
        assert_eq!(state.decide(&result, &config()), RetryDecision::Surface);
        assert_eq!(state.range_gone_attempts(), 0);
    }

    #[test]
    fn test_business_errors_surface_unchanged() {
        let mut state = RetryState::default();
        let config = config();

        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::CONFLICT,
            StatusCode::PRECONDITION_FAILED,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let result = OperationResult::with_status(status);
            assert_eq!(state.decide(&result, &config), RetryDecision::Surface);
        }
    }

    #[test]
    fn test_budgets_are_independent() {
        let mut state = RetryState::default();
        let config = config();

        let gone = OperationResult::with_status(StatusCode::GONE)
            .with_sub_status(SubStatus::PARTITION_KEY_RANGE_GONE);
        let throttle = throttled(None);

        // Exhaust the routing budget; the throttle budget is untouched.
        for _ in 0..3 {
            state.decide(&gone, &config);
        }
        assert!(matches!(
            state.decide(&throttle, &config),
            RetryDecision::Retry { .. }
        ));
    }
}
