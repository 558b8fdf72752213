use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type produced by a failing task.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors surfaced by a `ThreadPool` and its task handles.
///
/// The variants keep three outcomes apart: the task never ran (`Cancelled`,
/// `PoolSaturated`), the task ran and failed (`TaskFailed`), or the caller
/// stopped waiting (`Timeout`).
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The pool is shutting down or has terminated and accepts no new tasks.
    #[error("thread pool is shut down")]
    PoolTerminated,

    /// The pool was saturated and the `Abort` rejection policy refused the
    /// task.
    #[error("thread pool is saturated")]
    PoolSaturated,

    /// The task ran and returned an error or panicked.
    #[error("task failed: {0}")]
    TaskFailed(#[source] Arc<dyn StdError + Send + Sync>),

    /// The task was cancelled before it produced a result.
    #[error("task was cancelled")]
    Cancelled,

    /// A blocking wait elapsed before the awaited event happened.
    #[error("timed out")]
    Timeout,

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] Arc<io::Error>),
}

impl Error {
    pub(crate) fn task_failed(cause: BoxError) -> Error {
        Error::TaskFailed(Arc::from(cause))
    }

    /// Returns `true` if the task never got a chance to complete.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` for a wait that gave up; the task may still complete.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::WorkerSpawn(Arc::new(err))
    }
}

/// Cause attached to `Error::TaskFailed` when a task panics.
#[derive(Debug, Clone, Error)]
#[error("task panicked: {message}")]
pub struct TaskPanicked {
    message: String,
}

impl TaskPanicked {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> TaskPanicked {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        TaskPanicked { message }
    }

    /// The panic message, if the payload was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}
