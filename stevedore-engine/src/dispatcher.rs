//! Sealed-batch dispatch.
//!
//! A dispatch turns one sealed batch into one server request under one
//! permit: encode the body, call the transport with the batch headers,
//! measure backend time, parse the per-operation results, and route each
//! result to its operation's awaiter or back through the rebatch pipeline.
//! The permit is an RAII guard, so it is released on every path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use stevedore_core::OperationResult;
use stevedore_flow::{DispatchPermit, PermitLimiter, RangeMetrics};

use crate::buffer::SealedBatch;
use crate::cancel::CancelToken;
use crate::codec;
use crate::config::RetryConfig;
use crate::context::InflightOperation;
use crate::error::EngineError;
use crate::executor::ExecutorStats;
use crate::retry::RetryDecision;
use crate::transport::{BatchRequest, BatchTransport, ResponseMessage, TransportError};

/// Everything a dispatch needs, shared by all batches of one range.
pub struct DispatchContext {
    /// Transport collaborator.
    pub transport: Arc<dyn BatchTransport>,
    /// Per-range permit limiter.
    pub limiter: Arc<PermitLimiter>,
    /// Per-range counters.
    pub metrics: Arc<RangeMetrics>,
    /// Channel back into the executor's rebatch pipeline.
    pub rebatch_tx: mpsc::UnboundedSender<RebatchRequest>,
    /// Retry budgets.
    pub retry: RetryConfig,
    /// Engine-wide cancellation.
    pub cancel: CancelToken,
    /// Engine-wide stats.
    pub stats: Arc<ExecutorStats>,
}

/// An operation re-entering the engine after a retryable failure.
pub struct RebatchRequest {
    /// The operation, retry state intact.
    pub op: InflightOperation,
    /// Force a routing-map refresh before re-resolving the range.
    pub refresh_routing: bool,
}

/// Dispatches one sealed batch.
#[tracing::instrument(
    skip_all,
    fields(range_id = %batch.range_id, batch_id = %batch.batch_id, ops = batch.len())
)]
pub async fn dispatch(batch: SealedBatch, permit: DispatchPermit, ctx: Arc<DispatchContext>) {
    // Held for the whole dispatch; released on drop along every path.
    let _permit = permit;

    let body = codec::encode_batch_body(batch.ops());
    let request = BatchRequest::new(batch.range_id, body);

    let started = Instant::now();
    let outcome = tokio::select! {
        outcome = ctx.transport.execute(request, ctx.cancel.clone()) => outcome,
        () = ctx.cancel.cancelled() => Err(TransportError::Cancelled),
    };
    let backend = started.elapsed();
    ctx.stats.record_batch_dispatched();

    match outcome {
        Ok(message) => handle_response(batch, &message, backend, &ctx),
        Err(error) => handle_transport_failure(batch, &error, backend, &ctx),
    }
}

/// Distributes a parsed batch response to the batch's operations.
fn handle_response(
    batch: SealedBatch,
    message: &ResponseMessage,
    backend: Duration,
    ctx: &Arc<DispatchContext>,
) {
    let op_count = batch.len();

    let response = match codec::decode_batch_response(message) {
        Ok(response) => response,
        Err(error) => {
            warn!(error = %error, "malformed batch response");
            ctx.metrics.record_dispatch(0, 0, backend);
            fail_batch(batch, &EngineError::from(error));
            return;
        }
    };

    let mut results = response.results;
    if results.is_empty() && !response.status.is_success() {
        // Batch-level failure with no per-operation results: synthesize one
        // result per operation so the ordinary retry path applies.
        let template = OperationResult {
            status: response.status,
            sub_status: response.sub_status,
            etag: None,
            body: Bytes::new(),
            retry_after: message.retry_after,
            request_charge: 0.0,
        };
        results = vec![template; op_count];
    }

    if results.len() != op_count {
        warn!(
            expected = op_count,
            actual = results.len(),
            "batch response operation count mismatch"
        );
        ctx.metrics.record_dispatch(0, 0, backend);
        fail_batch(
            batch,
            &EngineError::Protocol {
                message: format!("expected {op_count} results, got {}", results.len()),
            },
        );
        return;
    }

    let throttles = results
        .iter()
        .filter(|r| r.status.is_throttled())
        .count() as u64;
    ctx.stats.record_request_charge(response.request_charge);

    for (op, result) in batch.into_ops().into_iter().zip(results) {
        dispose_result(op, result, ctx);
    }
    ctx.metrics.record_dispatch(op_count as u64, throttles, backend);
}

/// Routes one per-operation result: resolve the awaiter or rebatch.
fn dispose_result(mut op: InflightOperation, result: OperationResult, ctx: &Arc<DispatchContext>) {
    if result.is_success() {
        ctx.stats.record_operation_completed();
        op.resolve(Ok(result));
        return;
    }

    match op.context.retry.decide(&result, &ctx.retry) {
        RetryDecision::Surface => {
            ctx.stats.record_operation_completed();
            op.resolve(Ok(result));
        }
        RetryDecision::Retry {
            delay,
            refresh_routing,
        } => {
            debug!(
                item_id = %op.operation.item_id,
                status = %result.status,
                delay_ms = delay.as_millis() as u64,
                refresh_routing,
                "rebatching operation"
            );
            schedule_rebatch(op, delay, refresh_routing, ctx);
        }
    }
}

/// A whole-batch failure: every operation either salvages itself through
/// its routing-stale retry budget or surfaces the transport error.
fn handle_transport_failure(
    batch: SealedBatch,
    error: &TransportError,
    backend: Duration,
    ctx: &Arc<DispatchContext>,
) {
    ctx.metrics.record_dispatch(0, 0, backend);

    if *error == TransportError::Cancelled {
        fail_batch(batch, &EngineError::Cancelled);
        return;
    }

    warn!(error = %error, "batch transport failure");
    let failure = EngineError::from(error.clone());
    for mut op in batch.into_ops() {
        match op.context.retry.decide_routing_stale(&ctx.retry) {
            RetryDecision::Retry {
                refresh_routing, ..
            } => schedule_rebatch(op, Duration::ZERO, refresh_routing, ctx),
            RetryDecision::Surface => op.resolve(Err(failure.clone())),
        }
    }
}

fn fail_batch(batch: SealedBatch, error: &EngineError) {
    for op in batch.into_ops() {
        op.resolve(Err(error.clone()));
    }
}

fn schedule_rebatch(
    op: InflightOperation,
    delay: Duration,
    refresh_routing: bool,
    ctx: &Arc<DispatchContext>,
) {
    let request = RebatchRequest {
        op,
        refresh_routing,
    };
    if delay.is_zero() {
        send_rebatch(&ctx.rebatch_tx, request);
        return;
    }

    let rebatch_tx = ctx.rebatch_tx.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(delay) => send_rebatch(&rebatch_tx, request),
            () = cancel.cancelled() => request.op.resolve(Err(EngineError::Cancelled)),
        }
    });
}

fn send_rebatch(tx: &mpsc::UnboundedSender<RebatchRequest>, request: RebatchRequest) {
    if let Err(err) = tx.send(request) {
        // The rebatch loop is gone: the engine is shutting down.
        err.0.op.resolve(Err(EngineError::Cancelled));
    }
}
