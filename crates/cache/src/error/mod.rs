//! Error types for memoizing cache lookups
//!
//! A lookup can end without a value for three distinct reasons, and callers
//! must be able to tell them apart:
//!
//! 1. **`MemoError::Failed`**: the computation itself returned an error. The
//!    original error is shared with every caller that waited on the same
//!    attempt. Nothing is cached, so the next lookup computes again.
//!
//! 2. **`MemoError::Abandoned`**: the caller that was computing the value
//!    unwound (panic) or was cancelled before publishing an outcome. Waiters
//!    are woken with this error instead of hanging.
//!
//! 3. **`MemoError::TimedOut`**: the caller's own wait deadline passed while
//!    another caller was still computing. The computation keeps running and
//!    its result is still cached for everybody else.
//!
//! None of these are ever reported as an absent value: a lookup either yields
//! the computed value or one of the errors above.
//!
//! # Classification
//!
//! [`ErrorClassification`] gives a uniform way to decide on retries and log
//! levels:
//!
//! ```
//! use std::sync::Arc;
//!
//! use coalesce_cache::{ErrorClassification, ErrorSeverity, MemoError};
//!
//! let err: MemoError<String> = MemoError::Failed(Arc::new("backend down".to_string()));
//! assert!(err.is_retryable());
//! assert_eq!(err.severity(), ErrorSeverity::Warning);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Outcome of a lookup that did not produce a value.
///
/// `E` is the error type of the caller-supplied computation.
#[derive(Debug, Error)]
pub enum MemoError<E> {
    /// The computation returned an error; nothing was cached
    #[error("computation failed: {0}")]
    Failed(Arc<E>),

    /// The computing caller unwound or was cancelled before settling
    #[error("computation was abandoned before it settled")]
    Abandoned,

    /// The caller stopped waiting for an in-flight computation
    #[error("timed out after {waited:?} waiting for an in-flight computation")]
    TimedOut {
        /// How long the caller waited before giving up
        waited: Duration,
    },
}

impl<E> Clone for MemoError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Failed(err) => Self::Failed(Arc::clone(err)),
            Self::Abandoned => Self::Abandoned,
            Self::TimedOut { waited } => Self::TimedOut { waited: *waited },
        }
    }
}

impl<E> MemoError<E> {
    /// Returns `true` if the computation itself failed
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns `true` if the computing caller never settled the entry
    pub const fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }

    /// Returns `true` if this caller's own wait expired
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// The error returned by the computation, if that is why the lookup failed
    pub fn computation_error(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => Some(err.as_ref()),
            Self::Abandoned | Self::TimedOut { .. } => None,
        }
    }

    /// Shared handle to the computation error.
    ///
    /// Every waiter of a failed attempt receives the same `Arc`.
    pub fn shared_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Abandoned | Self::TimedOut { .. } => None,
        }
    }
}

/// Standard interface for classifying errors by retryability and severity
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: the same lookup may succeed if it is
    /// issued again.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// No memo outcome is critical: the cache never holds on to a failed or
/// abandoned entry, so the next lookup starts from a clean slate. Retry
/// timing belongs to the computation, so no delay is suggested either.
impl<E> ErrorClassification for MemoError<E> {
    fn is_retryable(&self) -> bool {
        // failures are never cached, so every outcome can be retried
        true
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Failed(_) | Self::TimedOut { .. } => ErrorSeverity::Warning,
            Self::Abandoned => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
