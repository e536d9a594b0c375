//! Error types for windgate.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a [`WindowStore`](crate::ratelimit::WindowStore) adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested entry does not exist.
    #[error("entry not found")]
    NotFound,

    /// A conditional write was rejected because its predicate did not hold.
    #[error("condition check failed")]
    ConditionFailed,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline expired before the store answered.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Any other adapter or transport failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Coarse classification of a [`LimiterError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller supplied an unusable key.
    InvalidInput,
    /// Store or engine failure.
    Internal,
    /// Reserved: exceeding a limit is reported through `LimitDecision::allowed`.
    RateLimitExceeded,
}

/// Main error type for windgate operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid rate limit key
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Engine failure that did not originate in the store
    #[error("internal error: {0}")]
    Internal(String),

    /// Store failure, wrapped with the operation that hit it
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    /// Reserved for callers that prefer an error over a denied decision
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Wrap a store failure with the operation it interrupted.
    pub fn store(context: &'static str, source: StoreError) -> Self {
        LimiterError::Store { context, source }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LimiterError::InvalidInput(_) => ErrorKind::InvalidInput,
            LimiterError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            LimiterError::Internal(_)
            | LimiterError::Store { .. }
            | LimiterError::Config(_)
            | LimiterError::Io(_) => ErrorKind::Internal,
        }
    }

    /// The underlying store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            LimiterError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for windgate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_is_wrapped_with_context() {
        let err = LimiterError::store("failed to check rate limit", StoreError::Backend("boom".into()));

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "failed to check rate limit: store backend error: boom");
        assert_eq!(err.store_error(), Some(&StoreError::Backend("boom".into())));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(LimiterError::InvalidInput("x".into()).kind(), ErrorKind::InvalidInput);
        assert_eq!(LimiterError::Internal("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(LimiterError::Config("x".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            LimiterError::RateLimitExceeded { retry_after: Duration::from_secs(1) }.kind(),
            ErrorKind::RateLimitExceeded
        );
    }
}
