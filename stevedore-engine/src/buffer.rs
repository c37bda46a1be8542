//! Bounded batch accumulation.

use std::time::Duration;

use tokio::time::Instant;

use stevedore_core::{BatchId, RangeId};

use crate::context::InflightOperation;

/// Why a buffer was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Admitting one more operation would exceed a count or byte limit.
    Size,
    /// The dispatch deadline fired.
    Deadline,
    /// The executor is shutting down.
    Shutdown,
}

impl FlushReason {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Deadline => "deadline",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Accumulates operations for one partition range until a limit is hit or a
/// dispatch deadline fires.
#[derive(Debug)]
pub struct BatchBuffer {
    ops: Vec<InflightOperation>,
    body_bytes: usize,
    max_ops: usize,
    max_body_bytes: usize,
    opened_at: Instant,
}

impl BatchBuffer {
    /// Creates an empty buffer with the given bounds.
    #[must_use]
    pub fn new(max_ops: usize, max_body_bytes: usize) -> Self {
        Self {
            ops: Vec::new(),
            body_bytes: 0,
            max_ops,
            max_body_bytes,
            opened_at: Instant::now(),
        }
    }

    /// Returns true if an operation with `body_len` body bytes fits without
    /// exceeding either limit.
    #[must_use]
    pub fn can_admit(&self, body_len: usize) -> bool {
        self.ops.len() < self.max_ops && self.body_bytes + body_len <= self.max_body_bytes
    }

    /// Appends an operation. The caller checks [`BatchBuffer::can_admit`]
    /// first.
    pub fn push(&mut self, op: InflightOperation) {
        debug_assert!(self.can_admit(op.body_len()), "operation does not fit");
        if self.ops.is_empty() {
            self.opened_at = Instant::now();
        }
        self.body_bytes += op.body_len();
        self.ops.push(op);
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the buffered body bytes.
    #[must_use]
    pub const fn body_bytes(&self) -> usize {
        self.body_bytes
    }

    /// Returns how long ago the first operation was admitted.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Seals the buffer into an immutable batch.
    pub fn seal(self, range_id: RangeId, batch_id: BatchId, reason: FlushReason) -> SealedBatch {
        debug_assert!(!self.ops.is_empty(), "sealing an empty buffer");
        debug_assert!(self.ops.len() <= self.max_ops);
        debug_assert!(self.body_bytes <= self.max_body_bytes);
        SealedBatch {
            range_id,
            batch_id,
            body_bytes: self.body_bytes,
            reason,
            age: self.age(),
            ops: self.ops,
        }
    }
}

/// An immutable, admission-ordered batch bound to one partition range.
#[derive(Debug)]
pub struct SealedBatch {
    /// Target partition range.
    pub range_id: RangeId,
    /// Batch id, unique within the streamer.
    pub batch_id: BatchId,
    /// Total operation body bytes.
    pub body_bytes: usize,
    /// Why the buffer was sealed.
    pub reason: FlushReason,
    /// Buffer age at seal time.
    pub age: Duration,
    ops: Vec<InflightOperation>,
}

impl SealedBatch {
    /// Returns the number of operations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the operations in admission order.
    #[must_use]
    pub fn ops(&self) -> &[InflightOperation] {
        &self.ops
    }

    /// Consumes the batch, yielding its operations in admission order.
    #[must_use]
    pub fn into_ops(self) -> Vec<InflightOperation> {
        self.ops
    }
}
