//! Per-operation state carried through the engine.

use stevedore_core::{ItemOperation, OperationResult, RangeId};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::EngineError;
use crate::retry::RetryState;

/// Terminal outcome delivered on an operation's future.
///
/// `Ok` carries the server's per-operation result, including non-success
/// statuses that escaped retry; `Err` carries engine-level failures.
pub type OperationOutcome = Result<OperationResult, EngineError>;

/// Single-producer completion slot resolved exactly once.
#[derive(Debug)]
pub struct ResultSlot {
    tx: Option<oneshot::Sender<OperationOutcome>>,
}

impl ResultSlot {
    /// Creates a slot and the receiver observing it.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<OperationOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Resolves the slot. A second resolution is a bug: it is logged and
    /// dropped, never delivered.
    pub fn resolve(&mut self, outcome: OperationOutcome) {
        match self.tx.take() {
            // The caller may have dropped the receiver; that's fine.
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                debug_assert!(false, "operation result resolved twice");
                warn!("ignoring second resolution of an operation result");
            }
        }
    }

    /// Returns true if the slot has been resolved.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }
}

impl Drop for ResultSlot {
    fn drop(&mut self) {
        // An operation dropped without resolution still settles its caller.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(EngineError::Cancelled));
        }
    }
}

/// Mutable per-operation engine state: target range, retry state, and the
/// caller's result slot.
#[derive(Debug)]
pub struct OperationContext {
    /// The partition range the operation is currently homed to.
    pub range_id: RangeId,
    /// Retry state carried across rebatches.
    pub retry: RetryState,
    slot: ResultSlot,
}

impl OperationContext {
    /// Creates a context homed to `range_id`.
    #[must_use]
    pub fn new(range_id: RangeId, slot: ResultSlot) -> Self {
        Self {
            range_id,
            retry: RetryState::default(),
            slot,
        }
    }
}

/// An operation travelling through the engine with its context attached.
#[derive(Debug)]
pub struct InflightOperation {
    /// The caller's operation.
    pub operation: ItemOperation,
    /// Engine-side state.
    pub context: OperationContext,
}

impl InflightOperation {
    /// Creates an in-flight operation.
    #[must_use]
    pub fn new(operation: ItemOperation, context: OperationContext) -> Self {
        Self { operation, context }
    }

    /// Returns the materialized body length.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.operation.body_len()
    }

    /// Resolves the operation, consuming it.
    pub fn resolve(mut self, outcome: OperationOutcome) {
        self.context.slot.resolve(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_core::StatusCode;

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let (mut slot, rx) = ResultSlot::channel();
        assert!(!slot.is_resolved());

        slot.resolve(Ok(OperationResult::with_status(StatusCode::CREATED)));
        assert!(slot.is_resolved());

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap().status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_drop_without_resolution_cancels() {
        let (slot, rx) = ResultSlot::channel();
        drop(slot);

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap_err(), EngineError::Cancelled);
    }

    #[tokio::test]
    async fn test_resolve_with_dropped_receiver_is_harmless() {
        let (mut slot, rx) = ResultSlot::channel();
        drop(rx);
        slot.resolve(Err(EngineError::Cancelled));
        assert!(slot.is_resolved());
    }
}
