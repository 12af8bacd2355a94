//! Task identity, options, status and the caller-side handle.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::priority::Priority;
use crate::deadline::{DeadlineError, TimeoutError};

/// Scheduler-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a task. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Per-task scheduling options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    pub priority: Priority,
    /// Deadline for each attempt.
    pub timeout: Option<Duration>,
    /// Extra attempts after the first failure.
    pub retries: u32,
}

impl TaskOptions {
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Why a task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Timeout(TimeoutError),

    #[error("{0}")]
    Failed(E),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Task dropped before completion")]
    Dropped,
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl<E> From<DeadlineError<E>> for TaskError<E> {
    fn from(e: DeadlineError<E>) -> Self {
        match e {
            DeadlineError::Timeout(t) => Self::Timeout(t),
            DeadlineError::Failed(e) => Self::Failed(e),
        }
    }
}

pub(crate) type TaskResult<T, E> = Result<T, TaskError<E>>;

/// Resolves exactly once with the task's outcome.
pub struct TaskHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult<T, E>>,
    cancel: CancellationToken,
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(
        id: TaskId,
        rx: oneshot::Receiver<TaskResult<T, E>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id, rx, cancel }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = TaskResult<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a value: either removed from the queue
            // by cancellation or lost with the runtime.
            Poll::Ready(Err(_)) if self.cancel.is_cancelled() => Poll::Ready(Err(TaskError::Cancelled)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
