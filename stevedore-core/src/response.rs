//! Server result types.
//!
//! A batch request yields a [`BatchResponse`]: a batch-level status plus one
//! [`OperationResult`] per operation, in admission order. Status and
//! substatus codes are newtypes with classification helpers so retry
//! decisions read as predicates rather than magic numbers.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// HTTP-style status code of a batch or per-operation result.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 200 OK.
    pub const OK: Self = Self(200);
    /// 201 Created.
    pub const CREATED: Self = Self(201);
    /// 204 No Content.
    pub const NO_CONTENT: Self = Self(204);
    /// 400 Bad Request.
    pub const BAD_REQUEST: Self = Self(400);
    /// 404 Not Found.
    pub const NOT_FOUND: Self = Self(404);
    /// 409 Conflict.
    pub const CONFLICT: Self = Self(409);
    /// 410 Gone: the addressed partition range no longer exists.
    pub const GONE: Self = Self(410);
    /// 412 Precondition Failed.
    pub const PRECONDITION_FAILED: Self = Self(412);
    /// 413 Request Entity Too Large.
    pub const REQUEST_ENTITY_TOO_LARGE: Self = Self(413);
    /// 429 Too Many Requests: the server throttled the request.
    pub const TOO_MANY_REQUESTS: Self = Self(429);
    /// 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    /// 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self(503);

    /// Creates a status code from a raw u16.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw u16 value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if the server throttled the request.
    #[must_use]
    pub const fn is_throttled(self) -> bool {
        self.0 == 429
    }

    /// Returns true if the addressed partition range is gone.
    #[must_use]
    pub const fn is_gone(self) -> bool {
        self.0 == 410
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status({})", self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Substatus qualifying a [`StatusCode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SubStatus(u16);

impl SubStatus {
    /// No substatus.
    pub const NONE: Self = Self(0);
    /// The partition key range was split or merged away.
    pub const PARTITION_KEY_RANGE_GONE: Self = Self(1002);
    /// A partition split is completing.
    pub const COMPLETING_SPLIT: Self = Self(1007);
    /// A partition migration is completing.
    pub const COMPLETING_PARTITION_MIGRATION: Self = Self(1008);

    /// Creates a substatus from a raw u16.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw u16 value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns true if this substatus indicates stale routing.
    ///
    /// Only the split/merge/migration substatuses qualify; a bare 410 with
    /// no substatus is a terminal per-operation result.
    #[must_use]
    pub const fn is_routing_stale(self) -> bool {
        matches!(
            self,
            Self::PARTITION_KEY_RANGE_GONE
                | Self::COMPLETING_SPLIT
                | Self::COMPLETING_PARTITION_MIGRATION
        )
    }
}

impl fmt::Debug for SubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "substatus({})", self.0)
    }
}

/// Result of a single operation within a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// Per-operation status.
    pub status: StatusCode,
    /// Per-operation substatus.
    pub sub_status: SubStatus,
    /// Etag of the stored item, if the server returned one.
    pub etag: Option<String>,
    /// Resource body returned by the server (may be empty).
    pub body: Bytes,
    /// Server-suggested wait before retrying (429 responses).
    pub retry_after: Option<Duration>,
    /// Request charge attributed to this operation, in request units.
    pub request_charge: f64,
}

impl OperationResult {
    /// Creates a result with the given status and empty body.
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            sub_status: SubStatus::NONE,
            etag: None,
            body: Bytes::new(),
            retry_after: None,
            request_charge: 0.0,
        }
    }

    /// Sets the substatus.
    #[must_use]
    pub const fn with_sub_status(mut self, sub_status: SubStatus) -> Self {
        self.sub_status = sub_status;
        self
    }

    /// Sets the retry-after hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Returns true for a successful per-operation status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Parsed response to one batch request.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// Batch-level status.
    pub status: StatusCode,
    /// Batch-level substatus.
    pub sub_status: SubStatus,
    /// Total request charge for the batch, in request units.
    pub request_charge: f64,
    /// Per-operation results in admission order.
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    /// Returns the number of throttled per-operation results.
    #[must_use]
    pub fn throttled_count(&self) -> u64 {
        self.results
            .iter()
            .filter(|r| r.status.is_throttled())
            .count() as u64
    }
}
