//! Per-range operation streamer.
//!
//! One streamer per partition range converts the stream of single
//! operations into sealed batches:
//!
//! - `add` appends to the active buffer, sealing it first when the
//!   operation would not fit (fill-based seal);
//! - the first admission into an empty buffer schedules a dispatch deadline
//!   through the shared [`TimerPool`]; the deadline seals whatever has
//!   accumulated (deadline-based seal).
//!
//! Both seal paths run under the same mutex and a generation counter, so a
//! deadline racing a fill seal can never seal the successor buffer. Sealed
//! batches flow over a channel to the streamer's dispatch loop, which takes
//! one permit per batch before spawning the dispatch, preserving per-range
//! batch order while the limiter bounds concurrency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use stevedore_core::{BatchId, RangeId};

use crate::buffer::{BatchBuffer, FlushReason, SealedBatch};
use crate::config::ExecutorConfig;
use crate::context::InflightOperation;
use crate::dispatcher::{self, DispatchContext};
use crate::error::EngineError;
use crate::timer::{TimerCancel, TimerEvent, TimerPool};

/// Per-range accumulator and dispatch pump.
#[derive(Debug)]
pub struct Streamer {
    shared: Arc<StreamerShared>,
}

#[derive(Debug)]
struct StreamerShared {
    range_id: RangeId,
    max_ops: usize,
    max_body_bytes: usize,
    dispatch_interval: Duration,
    timers: TimerPool,
    active: Mutex<ActiveBuffer>,
    /// Taken on close so the dispatch loop drains and exits.
    batch_tx: Mutex<Option<mpsc::UnboundedSender<SealedBatch>>>,
    batch_seq: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug)]
struct ActiveBuffer {
    buffer: BatchBuffer,
    /// Bumped on every seal; a deadline only seals its own generation.
    generation: u64,
    deadline: Option<TimerCancel>,
}

impl Streamer {
    /// Creates a streamer and spawns its dispatch loop.
    #[must_use]
    pub fn spawn(
        range_id: RangeId,
        config: &ExecutorConfig,
        timers: TimerPool,
        ctx: Arc<DispatchContext>,
    ) -> (Self, JoinHandle<()>) {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(StreamerShared {
            range_id,
            max_ops: config.max_batch_operations,
            max_body_bytes: config.max_batch_body_bytes,
            dispatch_interval: config.dispatch_interval,
            timers,
            active: Mutex::new(ActiveBuffer {
                buffer: BatchBuffer::new(config.max_batch_operations, config.max_batch_body_bytes),
                generation: 0,
                deadline: None,
            }),
            batch_tx: Mutex::new(Some(batch_tx)),
            batch_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        let handle = tokio::spawn(dispatch_loop(range_id, batch_rx, ctx));
        (Self { shared }, handle)
    }

    /// Admits an operation.
    ///
    /// Never fails: a streamer that is already closed resolves the
    /// operation with a cancellation outcome instead.
    pub fn add(&self, op: InflightOperation) {
        if self.shared.closed.load(Ordering::Acquire) {
            op.resolve(Err(EngineError::Cancelled));
            return;
        }

        let mut active = self.shared.lock_active();
        if !active.buffer.is_empty() && !active.buffer.can_admit(op.body_len()) {
            self.shared.seal_locked(&mut active, FlushReason::Size);
        }
        let was_empty = active.buffer.is_empty();
        active.buffer.push(op);
        if was_empty {
            self.arm_deadline(&mut active);
        }
    }

    /// Seals and hands off whatever has accumulated.
    pub fn flush(&self, reason: FlushReason) {
        let mut active = self.shared.lock_active();
        self.shared.seal_locked(&mut active, reason);
    }

    /// Force-flushes the buffer and stops accepting operations.
    ///
    /// Dropping the batch sender lets the dispatch loop drain its queue and
    /// exit.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.flush(FlushReason::Shutdown);
        let mut sender = self
            .shared
            .batch_tx
            .lock()
            .expect("streamer sender lock poisoned");
        *sender = None;
    }

    /// Schedules the dispatch deadline for the buffer's current generation.
    fn arm_deadline(&self, active: &mut ActiveBuffer) {
        let handle = self.shared.timers.schedule(self.shared.dispatch_interval);
        active.deadline = Some(handle.cancel_handle());

        let generation = active.generation;
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if handle.wait().await == TimerEvent::Fired {
                shared.seal_due(generation);
            }
        });
    }
}

impl StreamerShared {
    fn lock_active(&self) -> MutexGuard<'_, ActiveBuffer> {
        self.active.lock().expect("streamer buffer lock poisoned")
    }

    /// Deadline-based seal; a stale generation means a fill seal won.
    fn seal_due(&self, generation: u64) {
        let mut active = self.lock_active();
        if active.generation == generation {
            self.seal_locked(&mut active, FlushReason::Deadline);
        }
    }

    /// Seals and swaps the active buffer, handing the batch to the
    /// dispatch loop. No-op on an empty buffer.
    fn seal_locked(&self, active: &mut ActiveBuffer, reason: FlushReason) {
        if active.buffer.is_empty() {
            return;
        }
        if let Some(deadline) = active.deadline.take() {
            deadline.cancel();
        }

        let buffer = std::mem::replace(
            &mut active.buffer,
            BatchBuffer::new(self.max_ops, self.max_body_bytes),
        );
        active.generation += 1;

        let batch_id = BatchId::new(self.batch_seq.fetch_add(1, Ordering::Relaxed));
        let batch = buffer.seal(self.range_id, batch_id, reason);
        debug!(
            range_id = %self.range_id,
            batch_id = %batch.batch_id,
            ops = batch.len(),
            bytes = batch.body_bytes,
            reason = reason.as_str(),
            age_ms = batch.age.as_millis() as u64,
            "sealed batch"
        );

        let tx = {
            let sender = self
                .batch_tx
                .lock()
                .expect("streamer sender lock poisoned");
            sender.clone()
        };
        match tx {
            Some(tx) => {
                if let Err(err) = tx.send(batch) {
                    resolve_cancelled(err.0);
                }
            }
            None => resolve_cancelled(batch),
        }
    }
}

fn resolve_cancelled(batch: SealedBatch) {
    for op in batch.into_ops() {
        op.resolve(Err(EngineError::Cancelled));
    }
}

/// Receives sealed batches and dispatches each under one permit.
async fn dispatch_loop(
    range_id: RangeId,
    mut batch_rx: mpsc::UnboundedReceiver<SealedBatch>,
    ctx: Arc<DispatchContext>,
) {
    let mut inflight = JoinSet::new();

    while let Some(batch) = batch_rx.recv().await {
        // Reap finished dispatches so the set stays small.
        while inflight.try_join_next().is_some() {}

        if ctx.cancel.is_cancelled() {
            resolve_cancelled(batch);
            continue;
        }

        let permit = tokio::select! {
            permit = ctx.limiter.acquire() => permit,
            () = ctx.cancel.cancelled() => {
                resolve_cancelled(batch);
                continue;
            }
        };
        match permit {
            Ok(permit) => {
                let ctx = Arc::clone(&ctx);
                inflight.spawn(dispatcher::dispatch(batch, permit, ctx));
            }
            Err(_) => resolve_cancelled(batch),
        }
    }

    while inflight.join_next().await.is_some() {}
    debug!(range_id = %range_id, "dispatch loop drained");
}
