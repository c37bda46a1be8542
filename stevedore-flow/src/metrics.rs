//! Per-range dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters for one partition range.
///
/// Updated by the dispatcher after every batch, read concurrently by the
/// congestion controller. Relaxed ordering is sufficient: the controller
/// tolerates a tick's worth of staleness.
#[derive(Debug, Default)]
pub struct RangeMetrics {
    /// Operations whose results the server has returned.
    docs_served: AtomicU64,
    /// Per-operation throttle (429) results observed.
    throttles: AtomicU64,
    /// Cumulative backend time across dispatches, in milliseconds.
    backend_millis: AtomicU64,
}

impl RangeMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed dispatch.
    pub fn record_dispatch(&self, docs: u64, throttles: u64, backend: Duration) {
        self.docs_served.fetch_add(docs, Ordering::Relaxed);
        self.throttles.fetch_add(throttles, Ordering::Relaxed);
        self.backend_millis
            .fetch_add(backend.as_millis() as u64, Ordering::Relaxed);
    }

    /// Returns the cumulative operations served.
    #[must_use]
    pub fn docs_served(&self) -> u64 {
        self.docs_served.load(Ordering::Relaxed)
    }

    /// Returns the cumulative throttle count.
    #[must_use]
    pub fn throttles(&self) -> u64 {
        self.throttles.load(Ordering::Relaxed)
    }

    /// Returns the cumulative backend time in milliseconds.
    #[must_use]
    pub fn backend_millis(&self) -> u64 {
        self.backend_millis.load(Ordering::Relaxed)
    }

    /// Returns the cumulative backend time in whole seconds.
    #[must_use]
    pub fn backend_secs(&self) -> u64 {
        self.backend_millis() / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RangeMetrics::new();
        metrics.record_dispatch(10, 2, Duration::from_millis(700));
        metrics.record_dispatch(5, 0, Duration::from_millis(400));

        assert_eq!(metrics.docs_served(), 15);
        assert_eq!(metrics.throttles(), 2);
        assert_eq!(metrics.backend_millis(), 1100);
        assert_eq!(metrics.backend_secs(), 1);
    }
}
