//! Deadline error types.

use std::time::Duration;

use thiserror::Error;

/// An attempt did not finish before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Operation {operation_id} timed out after {}ms", .duration.as_millis())]
pub struct TimeoutError {
    pub duration: Duration,
    pub operation_id: String,
}

impl TimeoutError {
    pub fn new(duration: Duration, operation_id: impl Into<String>) -> Self {
        Self {
            duration,
            operation_id: operation_id.into(),
        }
    }
}

/// Failure of a deadline-wrapped operation.
#[derive(Debug, Error)]
pub enum DeadlineError<E> {
    #[error("{0}")]
    Timeout(TimeoutError),

    #[error("{0}")]
    Failed(E),
}

impl<E> DeadlineError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The operation's own error, if it was not a timeout.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Timeout(_) => None,
        }
    }
}

impl<E> From<TimeoutError> for DeadlineError<E> {
    fn from(e: TimeoutError) -> Self {
        Self::Timeout(e)
    }
}
