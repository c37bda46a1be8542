//! Flow control error types.

/// Flow control error type.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The limiter was closed while a caller was waiting on it.
    #[error("permit limiter closed")]
    Closed,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
