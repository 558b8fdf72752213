use crate::error::Error;
use crate::task::{JobBox, TaskId};
use crate::thread_pool::ThreadPool;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

/// What a pool does with a task it cannot accept.
///
/// A pool rejects a submission when its work queue is full and it already
/// runs `max_pool_size` workers. The policy is chosen once, when the pool is
/// built, and applied at most once per rejected submission.
#[derive(Clone)]
pub enum RejectionPolicy {
    /// Fail the task's handle with `Error::PoolSaturated` without running it.
    Abort,

    /// Run the task on the submitting thread, blocking `submit` until it is
    /// done. If the pool was shut down meanwhile the task is cancelled instead.
    CallerRuns,

    /// Drop the task; its handle reports `Error::Cancelled`.
    Discard,

    /// Cancel the oldest queued task and queue the new one in its place. If
    /// the queue turns out to be empty the new task is discarded.
    DiscardOldest,

    /// Hand the task to a user supplied function.
    Custom(Arc<dyn Fn(RejectedTask, &ThreadPool) + Send + Sync>),
}

/// A task refused by a pool, passed to a `RejectionPolicy::Custom` handler.
///
/// Dropping it without calling one of its methods cancels the task.
pub struct RejectedTask {
    job: JobBox,
}

impl RejectionPolicy {
    /// Build a `Custom` policy from a closure
    pub fn custom<F>(f: F) -> RejectionPolicy
        where F: Fn(RejectedTask, &ThreadPool) + Send + Sync + 'static
    {
        RejectionPolicy::Custom(Arc::new(f))
    }

    fn name(&self) -> &'static str {
        match *self {
            RejectionPolicy::Abort => "abort",
            RejectionPolicy::CallerRuns => "caller_runs",
            RejectionPolicy::Discard => "discard",
            RejectionPolicy::DiscardOldest => "discard_oldest",
            RejectionPolicy::Custom(_) => "custom",
        }
    }

    pub(crate) fn handle(&self, job: JobBox, pool: &ThreadPool) {
        debug!(task = %job.id(), policy = self.name(), "task rejected");

        match *self {
            RejectionPolicy::Abort => {
                job.fail(Error::PoolSaturated);
            }
            RejectionPolicy::CallerRuns => {
                if pool.is_shutdown() {
                    job.cancel();
                } else {
                    pool.run_in_caller(job);
                }
            }
            RejectionPolicy::Discard => {
                job.cancel();
            }
            RejectionPolicy::DiscardOldest => {
                pool.replace_oldest(job);
            }
            RejectionPolicy::Custom(ref f) => {
                f(RejectedTask { job }, pool);
            }
        }
    }
}

impl Default for RejectionPolicy {
    fn default() -> RejectionPolicy {
        RejectionPolicy::Abort
    }
}

impl fmt::Debug for RejectionPolicy {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RejectionPolicy::Abort => fmt.write_str("Abort"),
            RejectionPolicy::CallerRuns => fmt.write_str("CallerRuns"),
            RejectionPolicy::Discard => fmt.write_str("Discard"),
            RejectionPolicy::DiscardOldest => fmt.write_str("DiscardOldest"),
            RejectionPolicy::Custom(_) => fmt.write_str("Custom(_)"),
        }
    }
}

// ===== impl RejectedTask =====

impl RejectedTask {
    /// Returns the identifier of the rejected task
    pub fn id(&self) -> TaskId {
        self.job.id()
    }

    /// Returns the instant the task was submitted
    pub fn submitted_at(&self) -> Instant {
        self.job.submitted_at()
    }

    /// Run the task on the current thread, delivering its result to the
    /// handle. Does nothing if the handle was already cancelled.
    pub fn run(self) {
        if self.job.start() {
            self.job.run_box();
        }
    }

    /// Cancel the task
    pub fn cancel(self) {
        self.job.cancel();
    }

    /// Fail the task with `Error::PoolSaturated`
    pub fn abort(self) {
        self.job.fail(Error::PoolSaturated);
    }
}

impl fmt::Debug for RejectedTask {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("RejectedTask")
           .field("id", &self.job.id())
           .finish()
    }
}
