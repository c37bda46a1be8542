//! AIMD (Additive Increase Multiplicative Decrease) permit budgeting.
//!
//! The state machine here is pure: the [`CongestionController`] task feeds
//! it counter snapshots and applies the returned [`Adjustment`] to the
//! limiter. Keeping the decision logic free of clocks and channels makes
//! every branch unit-testable.
//!
//! The epoch tick is driven by *cumulative backend time*: an epoch elapses
//! once the range has accumulated `wait_secs` more seconds of backend work
//! since the last adjustment. The observation window lengthens by one
//! second per epoch, so the controller settles as a range stabilizes.
//!
//! [`CongestionController`]: crate::controller::CongestionController

/// Budget adjustment decided for one elapsed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// No change this epoch.
    Hold,
    /// Release this many additional permits.
    Increase(u32),
    /// Withhold this many permits from circulation.
    Decrease(u32),
}

/// Pure AIMD state for one partition range.
#[derive(Debug, Clone)]
pub struct AimdState {
    /// Current degree of concurrency (permits in circulation).
    dop: u32,
    /// Additive increase step. Starts at the configured value and drops to
    /// 1 permanently after the first decrease.
    step: u32,
    /// Concurrency ceiling.
    max_dop: u32,
    /// Backend seconds that must elapse before the next adjustment.
    wait_secs: u64,
    /// Cumulative backend seconds at the last adjustment.
    last_backend_secs: u64,
    /// Docs-served counter at the last adjustment.
    old_docs: u64,
    /// Throttle counter at the last adjustment.
    old_throttles: u64,
    /// Total increase adjustments applied.
    total_increases: u64,
    /// Total decrease adjustments applied.
    total_decreases: u64,
}

impl AimdState {
    /// Creates AIMD state starting at `initial_dop` permits.
    #[must_use]
    pub const fn new(initial_dop: u32, max_dop: u32, initial_step: u32) -> Self {
        Self {
            dop: initial_dop,
            step: initial_step,
            max_dop,
            wait_secs: 1,
            last_backend_secs: 0,
            old_docs: 0,
            old_throttles: 0,
            total_increases: 0,
            total_decreases: 0,
        }
    }

    /// Returns the current degree of concurrency.
    #[must_use]
    pub const fn dop(&self) -> u32 {
        self.dop
    }

    /// Evaluates one poll of the range counters.
    ///
    /// Returns `None` while the current observation window has not yet
    /// elapsed (the caller should idle briefly and poll again), or the
    /// adjustment for the completed epoch.
    pub fn tick(&mut self, backend_secs: u64, docs: u64, throttles: u64) -> Option<Adjustment> {
        if backend_secs.saturating_sub(self.last_backend_secs) < self.wait_secs {
            return None;
        }
        self.last_backend_secs = backend_secs;
        self.wait_secs += 1;

        let delta_docs = docs.saturating_sub(self.old_docs);
        let delta_throttles = throttles.saturating_sub(self.old_throttles);
        self.old_docs = docs;
        self.old_throttles = throttles;

        if delta_throttles > 0 {
            // Multiplicative decrease. Heavier throttling pushes the factor
            // toward 1.0, cutting concurrency closer to zero in one step.
            self.step = 1;
            let decrease_factor = 1.0 + 1000.0 / (delta_throttles.max(1000) as f64);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let decrease = (f64::from(self.dop) / decrease_factor).floor() as u32;
            if decrease == 0 {
                return Some(Adjustment::Hold);
            }
            self.dop -= decrease;
            self.total_decreases += 1;
            Some(Adjustment::Decrease(decrease))
        } else if delta_docs > 0 {
            // Additive increase, bounded by the ceiling.
            if self.dop + self.step <= self.max_dop {
                self.dop += self.step;
                self.total_increases += 1;
                Some(Adjustment::Increase(self.step))
            } else {
                Some(Adjustment::Hold)
            }
        } else {
            Some(Adjustment::Hold)
        }
    }

    /// Returns a snapshot of the controller state.
    #[must_use]
    pub const fn snapshot(&self) -> AimdSnapshot {
        AimdSnapshot {
            dop: self.dop,
            step: self.step,
            wait_secs: self.wait_secs,
            total_increases: self.total_increases,
            total_decreases: self.total_decreases,
        }
    }
}

/// Point-in-time view of [`AimdState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AimdSnapshot {
    /// Current degree of concurrency.
    pub dop: u32,
    /// Current additive step.
    pub step: u32,
    /// Current observation window in backend seconds.
    pub wait_secs: u64,
    /// Total increase adjustments applied.
    pub total_increases: u64,
    /// Total decrease adjustments applied.
    pub total_decreases: u64,
}
