//! Request pipeline errors.

use thiserror::Error;

use crate::deadline::TimeoutError;
use crate::scheduler::TaskError;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Interceptor error: {0}")]
    Interceptor(String),

    #[error("Request queue is shutting down")]
    QueueClosed,
}

impl RequestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<TaskError<RequestError>> for RequestError {
    fn from(e: TaskError<RequestError>) -> Self {
        match e {
            TaskError::Timeout(t) => Self::Timeout(t),
            TaskError::Failed(e) => e,
            TaskError::Cancelled => Self::Cancelled,
            TaskError::ShuttingDown | TaskError::Dropped => Self::QueueClosed,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
