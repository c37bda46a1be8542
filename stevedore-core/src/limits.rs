//! Engine tunables and bounds.
//!
//! Put limits on everything: every buffer and permit budget has an explicit
//! maximum so the engine stays predictable under load.

use std::time::Duration;

/// Default maximum number of operations per server batch.
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 100;

/// Default maximum batch body size in bytes (1 MiB).
pub const DEFAULT_MAX_BATCH_BODY_BYTES: usize = 1024 * 1024;

/// Default upper bound on how long an operation waits in a non-full buffer.
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum timer resolution enforced by the timer pool.
pub const TIMER_RESOLUTION_FLOOR: Duration = Duration::from_secs(1);

/// Initial dispatch permits granted to each partition range.
pub const INITIAL_DISPATCH_PERMITS: u32 = 5;

/// Ceiling on the per-range degree of concurrency.
pub const MAX_DISPATCH_PERMITS: u32 = 60;

/// Initial additive-increase step for the congestion controller.
pub const INITIAL_ADDITIVE_STEP: u32 = 5;

/// Default retry budget for throttled operations.
pub const DEFAULT_MAX_THROTTLE_ATTEMPTS: u32 = 9;

/// Default cumulative wait budget for throttled operations.
pub const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(30);

/// Retry budget for stale-routing (partition split/merge) errors.
pub const MAX_RANGE_GONE_ATTEMPTS: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_bounds_are_consistent() {
        // The first additive increase from the initial budget must stay
        // within the concurrency ceiling.
        assert!(INITIAL_DISPATCH_PERMITS + INITIAL_ADDITIVE_STEP <= MAX_DISPATCH_PERMITS);
    }

    #[test]
    fn test_timer_floor_is_whole_seconds() {
        assert_eq!(TIMER_RESOLUTION_FLOOR.subsec_nanos(), 0);
        assert!(TIMER_RESOLUTION_FLOOR.as_secs() >= 1);
    }
}
