//! Transport collaborator seam.
//!
//! The engine never opens connections itself: it hands a fully-formed
//! [`BatchRequest`] to a [`BatchTransport`] implementation and parses the
//! returned [`ResponseMessage`]. Production code plugs in the real RPC
//! stack; tests plug in a scripted in-memory double.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use stevedore_core::{RangeId, StatusCode, SubStatus};

use crate::cancel::CancelToken;

/// Wire header names set on every batch request.
pub mod headers {
    /// Target partition key range id.
    pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
    /// Ask the server to keep executing after a per-operation failure.
    pub const BATCH_CONTINUE_ON_ERROR: &str = "x-ms-cosmos-batch-continue-on-error";
    /// Mark the request as a batch request.
    pub const IS_BATCH_REQUEST: &str = "x-ms-cosmos-is-batch-request";
}

/// A batch request addressed to one partition range.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Target range.
    pub range_id: RangeId,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Framed operation bodies in admission order.
    pub body: Bytes,
}

impl BatchRequest {
    /// Creates a request with the three batch headers set.
    #[must_use]
    pub fn new(range_id: RangeId, body: Bytes) -> Self {
        Self {
            range_id,
            headers: vec![
                (
                    headers::PARTITION_KEY_RANGE_ID.to_string(),
                    range_id.get().to_string(),
                ),
                (headers::BATCH_CONTINUE_ON_ERROR.to_string(), "true".to_string()),
                (headers::IS_BATCH_REQUEST.to_string(), "true".to_string()),
            ],
            body,
        }
    }

    /// Returns a header value by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Raw response to a batch request.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    /// Batch-level status.
    pub status: StatusCode,
    /// Batch-level substatus.
    pub sub_status: SubStatus,
    /// Server-suggested wait before retrying the batch.
    pub retry_after: Option<Duration>,
    /// Total request charge, in request units.
    pub request_charge: f64,
    /// Framed per-operation results.
    pub body: Bytes,
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection failed or was reset.
    #[error("connection failure: {message}")]
    Connection {
        /// Error description.
        message: String,
    },

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
}

/// Sends batch requests to the document store.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Executes one batch request.
    ///
    /// Implementations must observe `cancel` at their suspension points and
    /// return [`TransportError::Cancelled`] once it fires.
    ///
    /// # Errors
    /// Returns a [`TransportError`] on whole-request failure; per-operation
    /// failures travel inside the response body.
    async fn execute(
        &self,
        request: BatchRequest,
        cancel: CancelToken,
    ) -> Result<ResponseMessage, TransportError>;
}
