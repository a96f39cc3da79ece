//! # Backend Error Types
//!
//! Failures reported by the remote message store. Every variant is a
//! transient-remote failure from the engine's point of view: reads degrade to a
//! stale view with a retry affordance, writes roll back their optimistic state.

use thiserror::Error;

/// Result type alias for message backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error type for message backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The store could not be reached
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    /// The store refused the request
    #[error("Request rejected: {reason}")]
    Rejected { reason: String },

    /// The request did not complete in time
    #[error("Backend request timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// A live subscription ended on the remote side
    #[error("Subscription closed by the backend")]
    Closed,
}

impl BackendError {
    /// Create a new unavailable error
    #[must_use]
    pub fn unavailable<T: Into<String>>(message: T) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new rejected error
    #[must_use]
    pub fn rejected<T: Into<String>>(reason: T) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_creation() {
        let error = BackendError::unavailable("connection reset");
        assert!(matches!(error, BackendError::Unavailable { .. }));
        assert_eq!(error.to_string(), "Backend unavailable: connection reset");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_rejected_is_not_retryable() {
        let error = BackendError::rejected("message too long");
        assert_eq!(error.to_string(), "Request rejected: message too long");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let error = BackendError::Timeout { millis: 1500 };
        assert_eq!(error.to_string(), "Backend request timed out after 1500 ms");
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(
            BackendError::Closed.to_string(),
            "Subscription closed by the backend"
        );
    }
}
