//! Core error types.

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating or preparing an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The caller supplied an option combination the bulk path cannot honor.
    #[error("invalid usage: {reason}")]
    InvalidUsage {
        /// Why the input was rejected.
        reason: String,
    },

    /// The serialized operation body can never fit in a batch.
    #[error("operation body too large: {size} bytes (max {max})")]
    BodyTooLarge {
        /// Serialized body size.
        size: usize,
        /// Maximum batch body size.
        max: usize,
    },

    /// Payload serialization failed.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Error description.
        message: String,
    },
}

impl Error {
    /// Convenience constructor for invalid-usage errors.
    #[must_use]
    pub fn invalid_usage(reason: impl Into<String>) -> Self {
        Self::InvalidUsage {
            reason: reason.into(),
        }
    }
}
