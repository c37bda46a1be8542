//! Coalescing one-shot timer pool.
//!
//! Batch dispatch deadlines only need whole-second granularity, so one pool
//! coalesces every streamer's deadline onto a single background task: timers
//! due in the same second share one wakeup. Handles are cancellable;
//! cancellation is idempotent and completes the waiter with
//! [`TimerEvent::Cancelled`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;

use stevedore_core::limits::TIMER_RESOLUTION_FLOOR;

/// How a timer wait completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The deadline elapsed.
    Fired,
    /// The timer was cancelled before firing.
    Cancelled,
}

/// One-shot completion slot shared between the pool and the handle.
#[derive(Debug)]
struct TimerSlot {
    tx: Mutex<Option<oneshot::Sender<TimerEvent>>>,
}

impl TimerSlot {
    fn new(tx: oneshot::Sender<TimerEvent>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Completes the slot once; later calls are no-ops.
    fn complete(&self, event: TimerEvent) {
        let mut guard = self.tx.lock().expect("timer slot lock poisoned");
        if let Some(tx) = guard.take() {
            // The waiter may already be gone; that's fine.
            let _ = tx.send(event);
        }
    }
}

/// Waiter side of a scheduled deadline.
#[derive(Debug)]
pub struct TimerHandle {
    slot: Arc<TimerSlot>,
    rx: oneshot::Receiver<TimerEvent>,
}

impl TimerHandle {
    /// Returns a cancellation handle for this timer.
    #[must_use]
    pub fn cancel_handle(&self) -> TimerCancel {
        TimerCancel {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Suspends until the deadline fires or the timer is cancelled.
    pub async fn wait(self) -> TimerEvent {
        self.rx.await.unwrap_or(TimerEvent::Cancelled)
    }
}

/// Cancellation side of a scheduled deadline.
#[derive(Debug, Clone)]
pub struct TimerCancel {
    slot: Arc<TimerSlot>,
}

impl TimerCancel {
    /// Cancels the timer. Idempotent; a no-op if the timer already fired.
    pub fn cancel(&self) {
        self.slot.complete(TimerEvent::Cancelled);
    }
}

/// Shared low-resolution deadline scheduler.
///
/// Cloning is cheap; all clones share one background service task. The pool
/// must be created inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct TimerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    start: Instant,
    resolution_ms: u64,
    state: Mutex<PoolState>,
    wake: Notify,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Timers keyed by deadline tick.
    pending: BTreeMap<u64, Vec<Arc<TimerSlot>>>,
    closed: bool,
}

impl TimerPool {
    /// Creates a pool with the given resolution, floored at one second.
    #[must_use]
    pub fn new(resolution: Duration) -> Self {
        let resolution = resolution.max(TIMER_RESOLUTION_FLOOR);
        let inner = Arc::new(PoolInner {
            start: Instant::now(),
            resolution_ms: resolution.as_millis() as u64,
            state: Mutex::new(PoolState::default()),
            wake: Notify::new(),
        });
        tokio::spawn(service(Arc::clone(&inner)));
        Self { inner }
    }

    /// Schedules a deadline at least `delay` in the future, rounded up to
    /// the pool resolution.
    ///
    /// If the pool is disposed, the returned handle completes immediately
    /// with [`TimerEvent::Cancelled`].
    #[must_use]
    pub fn schedule(&self, delay: Duration) -> TimerHandle {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(TimerSlot::new(tx));
        let handle = TimerHandle {
            slot: Arc::clone(&slot),
            rx,
        };

        {
            let mut state = self.inner.state.lock().expect("timer pool lock poisoned");
            if state.closed {
                drop(state);
                slot.complete(TimerEvent::Cancelled);
                return handle;
            }
            let tick = self.inner.deadline_tick(delay);
            state.pending.entry(tick).or_default().push(slot);
        }
        self.inner.wake.notify_one();
        handle
    }

    /// Cancels every outstanding timer and stops the service task.
    pub fn dispose(&self) {
        let pending = {
            let mut state = self.inner.state.lock().expect("timer pool lock poisoned");
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        for slots in pending.into_values() {
            for slot in slots {
                slot.complete(TimerEvent::Cancelled);
            }
        }
        self.inner.wake.notify_one();
    }
}

impl PoolInner {
    /// Computes the deadline tick for a delay from now, rounding up.
    fn deadline_tick(&self, delay: Duration) -> u64 {
        let now_ms = self.start.elapsed().as_millis() as u64;
        let delay_ms = (delay.as_millis() as u64).max(self.resolution_ms);
        (now_ms + delay_ms).div_ceil(self.resolution_ms)
    }

    fn tick_instant(&self, tick: u64) -> Instant {
        self.start + Duration::from_millis(tick * self.resolution_ms)
    }
}

/// Background task firing due timers.
async fn service(inner: Arc<PoolInner>) {
    loop {
        let next = {
            let state = inner.state.lock().expect("timer pool lock poisoned");
            if state.closed {
                break;
            }
            state.pending.keys().next().copied()
        };

        match next {
            None => inner.wake.notified().await,
            Some(tick) => {
                tokio::select! {
                    () = tokio::time::sleep_until(inner.tick_instant(tick)) => {
                        let due: Vec<Arc<TimerSlot>> = {
                            let mut state =
                                inner.state.lock().expect("timer pool lock poisoned");
                            let later = state.pending.split_off(&(tick + 1));
                            let due = std::mem::replace(&mut state.pending, later);
                            due.into_values().flatten().collect()
                        };
                        for slot in due {
                            slot.complete(TimerEvent::Fired);
                        }
                    }
                    // A new earlier deadline or a dispose: re-evaluate.
                    () = inner.wake.notified() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_at_deadline() {
        let pool = TimerPool::new(Duration::from_secs(1));
        let started = Instant::now();

        let handle = pool.schedule(Duration::from_secs(1));
        assert_eq!(handle.wait().await, TimerEvent::Fired);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_floor_is_enforced() {
        let pool = TimerPool::new(Duration::from_millis(10));
        let started = Instant::now();

        // Sub-second delays round up to the one-second floor.
        let handle = pool.schedule(Duration::from_millis(50));
        assert_eq!(handle.wait().await, TimerEvent::Fired);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_completes_with_marker() {
        let pool = TimerPool::new(Duration::from_secs(1));
        let started = Instant::now();

        let handle = pool.schedule(Duration::from_secs(60));
        let cancel = handle.cancel_handle();
        cancel.cancel();
        cancel.cancel(); // idempotent

        assert_eq!(handle.wait().await, TimerEvent::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_timers_all_fire() {
        let pool = TimerPool::new(Duration::from_secs(1));

        let a = pool.schedule(Duration::from_millis(300));
        let b = pool.schedule(Duration::from_millis(700));
        let c = pool.schedule(Duration::from_secs(1));

        assert_eq!(a.wait().await, TimerEvent::Fired);
        assert_eq!(b.wait().await, TimerEvent::Fired);
        assert_eq!(c.wait().await, TimerEvent::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_outstanding() {
        let pool = TimerPool::new(Duration::from_secs(1));

        let handle = pool.schedule(Duration::from_secs(60));
        pool.dispose();
        assert_eq!(handle.wait().await, TimerEvent::Cancelled);

        // Scheduling after dispose completes immediately.
        let late = pool.schedule(Duration::from_secs(1));
        assert_eq!(late.wait().await, TimerEvent::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_timer_preempts_sleep() {
        let pool = TimerPool::new(Duration::from_secs(1));
        let started = Instant::now();

        let far = pool.schedule(Duration::from_secs(30));
        let near = pool.schedule(Duration::from_secs(1));

        assert_eq!(near.wait().await, TimerEvent::Fired);
        assert!(started.elapsed() < Duration::from_secs(30));

        far.cancel_handle().cancel();
        assert_eq!(far.wait().await, TimerEvent::Cancelled);
    }
}
