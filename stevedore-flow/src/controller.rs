//! Congestion controller background task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::aimd::{Adjustment, AimdSnapshot, AimdState};
use crate::limiter::PermitLimiter;
use crate::metrics::RangeMetrics;

/// Idle sleep between polls while the observation window has not elapsed.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Background task adjusting one range's permit budget with AIMD.
///
/// Runs until the shutdown signal flips to `true` or the limiter closes.
/// Decreases block on [`PermitLimiter::withhold`], so concurrency only
/// drops as in-flight dispatches complete.
pub struct CongestionController {
    /// Range identifier, for logging only.
    range: u64,
    metrics: Arc<RangeMetrics>,
    limiter: Arc<PermitLimiter>,
    state: AimdState,
    shutdown: watch::Receiver<bool>,
}

impl CongestionController {
    /// Creates a controller for one range.
    #[must_use]
    pub fn new(
        range: u64,
        metrics: Arc<RangeMetrics>,
        limiter: Arc<PermitLimiter>,
        initial_dop: u32,
        max_dop: u32,
        initial_step: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            range,
            metrics,
            limiter,
            state: AimdState::new(initial_dop, max_dop, initial_step),
            shutdown,
        }
    }

    /// Returns a snapshot of the AIMD state.
    #[must_use]
    pub const fn snapshot(&self) -> AimdSnapshot {
        self.state.snapshot()
    }

    /// Runs the control loop until shutdown.
    pub async fn run(mut self) {
        debug!(range = self.range, "congestion controller started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let backend_secs = self.metrics.backend_secs();
            let docs = self.metrics.docs_served();
            let throttles = self.metrics.throttles();

            match self.state.tick(backend_secs, docs, throttles) {
                None => {
                    tokio::select! {
                        () = tokio::time::sleep(IDLE_SLEEP) => {}
                        changed = self.shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Adjustment::Decrease(n)) => {
                    debug!(
                        range = self.range,
                        withhold = n,
                        dop = self.state.dop(),
                        "congestion decrease"
                    );
                    let limiter = Arc::clone(&self.limiter);
                    tokio::select! {
                        result = limiter.withhold(n) => {
                            if result.is_err() {
                                break;
                            }
                        }
                        _ = self.shutdown.changed() => break,
                    }
                }
                Some(Adjustment::Increase(n)) => {
                    debug!(
                        range = self.range,
                        release = n,
                        dop = self.state.dop(),
                        "congestion increase"
                    );
                    self.limiter.release(n);
                }
                Some(Adjustment::Hold) => {}
            }
        }
        debug!(range = self.range, "congestion controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Polls `check` until it returns true or ~1s of virtual time passes.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        check()
    }

    #[tokio::test(start_paused = true)]
    async fn test_increase_releases_permits() {
        let metrics = Arc::new(RangeMetrics::new());
        let limiter = Arc::new(PermitLimiter::new(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = CongestionController::new(
            1,
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            5,
            60,
            5,
            shutdown_rx,
        );
        let task = tokio::spawn(controller.run());

        // One backend second of useful work: the controller should release
        // the additive step.
        metrics.record_dispatch(50, 0, Duration::from_secs(1));
        assert!(eventually(|| limiter.available() == 10).await);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrease_withholds_permits() {
        let metrics = Arc::new(RangeMetrics::new());
        let limiter = Arc::new(PermitLimiter::new(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = CongestionController::new(
            1,
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            5,
            60,
            5,
            shutdown_rx,
        );
        let task = tokio::spawn(controller.run());

        // Grow to 10 first.
        metrics.record_dispatch(50, 0, Duration::from_secs(1));
        assert!(eventually(|| limiter.available() == 10).await);

        // Sustained throttling over the next window: factor 1.5 at
        // Δthrottles = 2000, so floor(10 / 1.5) = 6 permits withheld.
        metrics.record_dispatch(50, 2000, Duration::from_secs(2));
        assert!(eventually(|| limiter.available() == 4).await);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_throttling_subsides() {
        let metrics = Arc::new(RangeMetrics::new());
        let limiter = Arc::new(PermitLimiter::new(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = CongestionController::new(
            1,
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            5,
            60,
            5,
            shutdown_rx,
        );
        let task = tokio::spawn(controller.run());

        metrics.record_dispatch(50, 2000, Duration::from_secs(1));
        assert!(eventually(|| limiter.available() < 5).await);

        // Throttling stops; progress resumes. Recovery proceeds in steps
        // of one once a decrease has happened.
        let floor = limiter.available();
        metrics.record_dispatch(50, 0, Duration::from_secs(2));
        assert!(eventually(|| limiter.available() == floor + 1).await);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_controller() {
        let metrics = Arc::new(RangeMetrics::new());
        let limiter = Arc::new(PermitLimiter::new(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller =
            CongestionController::new(1, metrics, Arc::clone(&limiter), 5, 60, 5, shutdown_rx);
        let task = tokio::spawn(controller.run());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
