//! Engine error types.
//!
//! [`EngineError`] covers engine-level failures only. A per-operation
//! server result with a non-success status is not an error at this layer:
//! it resolves the operation's future with the result unchanged, and the
//! caller inspects the status.

use stevedore_core::Error as CoreError;
use stevedore_flow::FlowError;

use crate::codec::CodecError;
use crate::transport::TransportError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level failures surfaced on operation futures or from `add`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The caller's input cannot be executed on the bulk path.
    #[error("invalid usage: {reason}")]
    InvalidUsage {
        /// Why the input was rejected.
        reason: String,
    },

    /// The partition routing collaborator could not resolve a range.
    #[error("routing unavailable: {message}")]
    RoutingUnavailable {
        /// Error description.
        message: String,
    },

    /// A whole-batch transport failure that escaped retry.
    #[error("transport failure: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// A malformed batch response or a result-count mismatch.
    #[error("protocol violation: {message}")]
    Protocol {
        /// What was malformed.
        message: String,
    },

    /// The operation was cancelled by the caller or by shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        Self::InvalidUsage {
            reason: err.to_string(),
        }
    }
}

impl From<FlowError> for EngineError {
    fn from(_: FlowError) -> Self {
        // The limiter only closes at shutdown.
        Self::Cancelled
    }
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}
