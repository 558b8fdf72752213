//! Execute tasks on one of possibly several pooled threads.
//!
//! A thread pool contains a set of previously spawned threads enabling running
//! tasks in parallel without having to spawn up a new thread for each task. It
//! bounds the resources consumed by a burst of work: at most `max_pool_size`
//! threads run and at most `work_queue_capacity` tasks wait, anything beyond
//! that is handed to a [`RejectionPolicy`](enum.RejectionPolicy.html).
//!
//! # Sizing
//!
//! A freshly built pool has no threads. Each submission is routed by a fixed
//! rule:
//!
//! 1. while fewer than `core_pool_size` workers exist, a new core worker is
//!    spawned and handed the task directly;
//! 2. otherwise the task is queued if the work queue has room;
//! 3. otherwise, while fewer than `max_pool_size` workers exist, a new
//!    overflow worker is spawned and handed the task directly;
//! 4. otherwise the rejection policy decides.
//!
//! Overflow workers retire after idling for the `keep_alive` duration. Core
//! workers stay until shutdown unless `allow_core_thread_timeout` is set.
//!
//! # Outcomes
//!
//! `submit` returns a [`TaskHandle`](struct.TaskHandle.html). Its result is
//! one of: the task's value, `Error::TaskFailed` when the task returned an
//! error or panicked, `Error::Cancelled` or `Error::PoolSaturated` when it
//! never ran, and `Error::Timeout` when a bounded wait gave up first. A
//! failing task never affects its siblings or the worker that ran it.
//!
//! # Shutdown
//!
//! `shutdown` stops intake and lets queued work drain. `shutdown_now` also
//! cancels whatever is still queued and raises the interrupt flag of running
//! tasks, which can poll it through [`interrupted`](fn.interrupted.html).
//! Running tasks are never killed.
//!
//! ```
//! use std::time::Duration;
//! use taskpool::{BoxError, RejectionPolicy, ThreadPool};
//!
//! let pool = ThreadPool::new(2, 4, 16, Duration::from_secs(30), RejectionPolicy::CallerRuns);
//!
//! let handle = pool.submit(|| Ok::<_, BoxError>(6 * 7)).unwrap();
//! assert_eq!(42, handle.join().unwrap());
//!
//! pool.shutdown();
//! assert!(pool.await_termination(Duration::from_secs(5)));
//! ```

#![deny(missing_docs, missing_debug_implementations)]

mod error;
mod handle;
mod queue;
mod rejection;
mod state;
mod task;
mod thread_pool;
mod worker;

pub use error::{BoxError, Error, TaskPanicked};
pub use handle::{TaskHandle, TaskState};
pub use queue::{Dequeue, EnqueueError, TaskQueue};
pub use rejection::{RejectedTask, RejectionPolicy};
pub use state::{PoolState, WorkerInfo, WorkerKind, WorkerState};
pub use task::{interrupted, Task, TaskId};
pub use thread_pool::{Builder, PoolStats, ThreadPool, UnstartedTask};
