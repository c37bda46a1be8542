//! The bulk executor facade.
//!
//! [`BulkExecutor::add`] is the whole caller-facing contract: validate,
//! materialize, resolve the partition range, hand the operation to the
//! range's streamer, and return a future. Per-range state (streamer,
//! limiter, counters, congestion controller) is created lazily on first
//! use and torn down only at [`BulkExecutor::dispose`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use stevedore_core::limits;
use stevedore_core::{Error as CoreError, ItemOperation, JsonSerializer, PayloadSerializer, RangeId};
use stevedore_flow::{CongestionController, PermitLimiter, RangeMetrics};

use crate::cancel::{CancelSource, CancelToken};
use crate::config::ExecutorConfig;
use crate::context::{InflightOperation, OperationContext, OperationOutcome, ResultSlot};
use crate::dispatcher::{DispatchContext, RebatchRequest};
use crate::error::{EngineError, EngineResult};
use crate::routing::{self, MetadataProvider};
use crate::streamer::Streamer;
use crate::timer::TimerPool;
use crate::transport::BatchTransport;

/// Engine-wide counters, exposed for monitoring and tests.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    ranges_created: AtomicU64,
    batches_dispatched: AtomicU64,
    operations_completed: AtomicU64,
    /// Request charge accumulated in micro-request-units, so the counter
    /// stays an integer.
    request_charge_micros: AtomicU64,
}

impl ExecutorStats {
    /// Records a newly created partition range state.
    pub fn record_range_created(&self) {
        self.ranges_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one batch handed to the transport.
    pub fn record_batch_dispatched(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one operation resolved with a server result.
    pub fn record_operation_completed(&self) {
        self.operations_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulates a batch's request charge.
    pub fn record_request_charge(&self, charge: f64) {
        let micros = (charge * 1_000_000.0) as u64;
        self.request_charge_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            ranges_created: self.ranges_created.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            operations_completed: self.operations_completed.load(Ordering::Relaxed),
            total_request_charge: self.request_charge_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
        }
    }
}

/// Point-in-time view of [`ExecutorStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorStatsSnapshot {
    /// Partition range states created.
    pub ranges_created: u64,
    /// Batches handed to the transport.
    pub batches_dispatched: u64,
    /// Operations resolved with a server result.
    pub operations_completed: u64,
    /// Total request charge, in request units.
    pub total_request_charge: f64,
}

/// Future side of a submitted operation.
#[derive(Debug)]
pub struct OperationHandle {
    rx: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    /// Suspends until the operation settles.
    pub async fn outcome(self) -> OperationOutcome {
        self.rx.await.unwrap_or(Err(EngineError::Cancelled))
    }
}

/// Per-range state: streamer, limiter, and counters.
struct RangeState {
    streamer: Streamer,
    limiter: Arc<PermitLimiter>,
    metrics: Arc<RangeMetrics>,
}

/// Client-side bulk execution engine for a partitioned document store.
pub struct BulkExecutor {
    shared: Arc<ExecutorShared>,
}

struct ExecutorShared {
    config: ExecutorConfig,
    metadata: Arc<dyn MetadataProvider>,
    transport: Arc<dyn BatchTransport>,
    serializer: Arc<dyn PayloadSerializer>,
    timers: TimerPool,
    cancel_source: CancelSource,
    cancel: CancelToken,
    rebatch_tx: mpsc::UnboundedSender<RebatchRequest>,
    ranges: RwLock<HashMap<RangeId, RangeState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<ExecutorStats>,
    closed: AtomicBool,
}

impl BulkExecutor {
    /// Creates an executor with the default JSON payload serializer.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        transport: Arc<dyn BatchTransport>,
        config: ExecutorConfig,
    ) -> EngineResult<Self> {
        Self::with_serializer(metadata, transport, config, Arc::new(JsonSerializer))
    }

    /// Creates an executor with a custom payload serializer.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn with_serializer(
        metadata: Arc<dyn MetadataProvider>,
        transport: Arc<dyn BatchTransport>,
        config: ExecutorConfig,
        serializer: Arc<dyn PayloadSerializer>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let cancel_source = CancelSource::new();
        let cancel = cancel_source.token();
        let timers = TimerPool::new(limits::TIMER_RESOLUTION_FLOOR);
        let (rebatch_tx, rebatch_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ExecutorShared {
            config,
            metadata,
            transport,
            serializer,
            timers,
            cancel_source,
            cancel,
            rebatch_tx,
            ranges: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            stats: Arc::new(ExecutorStats::default()),
            closed: AtomicBool::new(false),
        });

        let rebatch_handle = tokio::spawn(rebatch_loop(rebatch_rx, Arc::clone(&shared)));
        shared
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .push(rebatch_handle);

        Ok(Self { shared })
    }

    /// Submits one operation and returns its result future.
    ///
    /// # Errors
    /// Invalid-usage failures (unsupported options, missing or oversized
    /// payload) surface here synchronously; everything else settles the
    /// returned handle.
    pub async fn add(&self, mut operation: ItemOperation) -> EngineResult<OperationHandle> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }

        operation.options.ensure_bulk_compatible()?;

        let body_len = operation.materialize(self.shared.serializer.as_ref())?;
        if body_len > self.shared.config.max_batch_body_bytes {
            return Err(CoreError::BodyTooLarge {
                size: body_len,
                max: self.shared.config.max_batch_body_bytes,
            }
            .into());
        }

        let range_id = self.shared.resolve_range(&operation, false).await?;
        let (slot, rx) = ResultSlot::channel();
        let context = OperationContext::new(range_id, slot);
        self.shared
            .submit(InflightOperation::new(operation, context))
            .await;

        Ok(OperationHandle { rx })
    }

    /// Returns engine-wide counters.
    #[must_use]
    pub fn stats(&self) -> ExecutorStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the counters of one range, if it has been used.
    pub async fn range_metrics(&self, range_id: RangeId) -> Option<Arc<RangeMetrics>> {
        let ranges = self.shared.ranges.read().await;
        ranges.get(&range_id).map(|state| Arc::clone(&state.metrics))
    }

    /// Returns the available dispatch permits of one range, if it has been
    /// used.
    pub async fn available_permits(&self, range_id: RangeId) -> Option<usize> {
        let ranges = self.shared.ranges.read().await;
        ranges.get(&range_id).map(|state| state.limiter.available())
    }

    /// Returns the number of live partition range states.
    pub async fn range_count(&self) -> usize {
        self.shared.ranges.read().await.len()
    }

    /// Drains and shuts down the engine.
    ///
    /// Every streamer gets a final forced flush so no operation is lost in
    /// a buffer; operations that cannot complete resolve with a
    /// cancellation outcome. Idempotent.
    pub async fn dispose(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("bulk executor shutting down");

        self.shared.cancel_source.cancel();

        {
            let ranges = self.shared.ranges.read().await;
            for state in ranges.values() {
                state.streamer.close();
            }
        }

        self.shared.timers.dispose();

        {
            let ranges = self.shared.ranges.read().await;
            for state in ranges.values() {
                state.limiter.close();
            }
        }

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.shared.tasks.lock().expect("task list lock poisoned");
            tasks.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        self.shared.ranges.write().await.clear();
        info!("bulk executor shut down");
    }
}

impl ExecutorShared {
    /// Translates an operation's partition key into a range id.
    async fn resolve_range(
        &self,
        operation: &ItemOperation,
        refresh: bool,
    ) -> EngineResult<RangeId> {
        let definition = self.metadata.partition_key_definition(&self.cancel).await?;
        let map = if refresh {
            self.metadata.refresh_routing_map(&self.cancel).await?
        } else {
            self.metadata.routing_map(&self.cancel).await?
        };

        let key = match &operation.partition_key {
            Some(key) => key.clone(),
            None => self.metadata.none_partition_key(&self.cancel).await?,
        };

        let hash = routing::effective_hash(&key, &definition);
        map.range_of(hash)
            .ok_or_else(|| EngineError::RoutingUnavailable {
                message: format!("no range owns hash {hash}"),
            })
    }

    /// Hands an operation to its range's streamer, creating the range state
    /// on first use.
    async fn submit(&self, op: InflightOperation) {
        let range_id = op.context.range_id;

        {
            let ranges = self.ranges.read().await;
            if let Some(state) = ranges.get(&range_id) {
                state.streamer.add(op);
                return;
            }
        }

        let mut ranges = self.ranges.write().await;
        // Double-check: another creator may have won the race while we
        // waited for the write lock.
        if !ranges.contains_key(&range_id) {
            let state = self.create_range_state(range_id);
            ranges.insert(range_id, state);
            self.stats.record_range_created();
        }
        if let Some(state) = ranges.get(&range_id) {
            state.streamer.add(op);
        }
    }

    fn create_range_state(&self, range_id: RangeId) -> RangeState {
        debug!(range_id = %range_id, "creating partition range state");

        let limiter = Arc::new(PermitLimiter::new(limits::INITIAL_DISPATCH_PERMITS));
        let metrics = Arc::new(RangeMetrics::new());

        let controller = CongestionController::new(
            range_id.get(),
            Arc::clone(&metrics),
            Arc::clone(&limiter),
            limits::INITIAL_DISPATCH_PERMITS,
            limits::MAX_DISPATCH_PERMITS,
            limits::INITIAL_ADDITIVE_STEP,
            self.cancel_source.watch(),
        );
        let controller_handle = tokio::spawn(controller.run());

        let ctx = Arc::new(DispatchContext {
            transport: Arc::clone(&self.transport),
            limiter: Arc::clone(&limiter),
            metrics: Arc::clone(&metrics),
            rebatch_tx: self.rebatch_tx.clone(),
            retry: self.config.retry,
            cancel: self.cancel.clone(),
            stats: Arc::clone(&self.stats),
        });
        let (streamer, loop_handle) =
            Streamer::spawn(range_id, &self.config, self.timers.clone(), ctx);

        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        tasks.push(controller_handle);
        tasks.push(loop_handle);

        RangeState {
            streamer,
            limiter,
            metrics,
        }
    }
}

/// Drains the rebatch channel: re-resolve routing (refreshing the map when
/// asked to) and hand the operation to its new range's streamer.
async fn rebatch_loop(
    mut rebatch_rx: mpsc::UnboundedReceiver<RebatchRequest>,
    shared: Arc<ExecutorShared>,
) {
    loop {
        tokio::select! {
            request = rebatch_rx.recv() => {
                let Some(RebatchRequest { mut op, refresh_routing }) = request else {
                    break;
                };
                match shared.resolve_range(&op.operation, refresh_routing).await {
                    Ok(range_id) => {
                        op.context.range_id = range_id;
                        shared.submit(op).await;
                    }
                    Err(error) => op.resolve(Err(error)),
                }
            }
            () = shared.cancel.cancelled() => {
                while let Ok(request) = rebatch_rx.try_recv() {
                    request.op.resolve(Err(EngineError::Cancelled));
                }
                break;
            }
        }
    }
    debug!("rebatch loop stopped");
}
