//! Identifiers for partition ranges and sealed batches.
//!
//! Both ids wrap a `u64`, but they come from different places and must
//! never be mixed: a [`RangeId`] is handed out by the routing map and
//! addresses a server-side partition, while a [`BatchId`] is a local
//! per-streamer sequence number used to correlate log lines for one
//! dispatch.

use std::fmt;

/// Identifier of a partition key range: a contiguous slice of the hashed
/// key space owned by one server-side replica set.
///
/// The raw value is what the engine puts in the range-id request header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct RangeId(u64);

impl RangeId {
    /// Wraps a raw range id from the routing map.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value for headers and logging.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range({})", self.0)
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range-{}", self.0)
    }
}

impl From<u64> for RangeId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<RangeId> for u64 {
    fn from(id: RangeId) -> Self {
        id.get()
    }
}

/// Identifier of a sealed batch.
///
/// Assigned from a per-streamer counter when the buffer seals, so it is
/// unique only within one partition range's streamer. Carried purely for
/// log correlation; the wire protocol never sees it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct BatchId(u64);

impl BatchId {
    /// Wraps a raw sequence number.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch({})", self.0)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

impl From<u64> for BatchId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<BatchId> for u64 {
    fn from(id: BatchId) -> Self {
        id.get()
    }
}
