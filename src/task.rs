use crate::error::{BoxError, Error, TaskPanicked};
use crate::handle::{Shared, TaskHandle};

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::time::Instant;

use tracing::warn;

/// A unit of work that runs on a thread pool.
///
/// Any `FnOnce() -> Result<T, E>` closure is a `Task` as long as `E` converts
/// into a `BoxError`, so most callers never implement this trait by hand.
pub trait Task: Send + 'static {
    /// The value produced when the task succeeds.
    type Output: Send + 'static;

    /// Run the task
    fn run(self) -> Result<Self::Output, BoxError>;
}

impl<F, T, E> Task for F
    where F: FnOnce() -> Result<T, E> + Send + 'static,
          T: Send + 'static,
          E: Into<BoxError>,
{
    type Output = T;

    fn run(self) -> Result<T, BoxError> {
        (self)().map_err(Into::into)
    }
}

/// Identifies a task submitted to a pool.
///
/// Identifiers are assigned in submission order and are unique per pool.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(id: u64) -> TaskId {
        TaskId(id)
    }

    /// Returns the raw identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.0)
    }
}

/// Returns `true` if the task running on the current thread was asked to
/// stop.
///
/// Tasks are never killed. A cancelled handle or `shutdown_now` only raises
/// this flag, and long running task code is expected to poll it at safe points
/// and return early. Outside of a pool task this always returns `false`.
pub fn interrupted() -> bool {
    CURRENT.with(|current| {
        current.borrow().as_ref().map_or(false, Interrupt::is_set)
    })
}

thread_local! {
    static CURRENT: RefCell<Option<Interrupt>> = const { RefCell::new(None) };
}

/// Cooperative cancellation flag shared by a task, its handle and the worker
/// running it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Interrupt(Arc<AtomicBool>);

/// Restores the previous thread-local interrupt flag when dropped
pub(crate) struct Entered {
    prev: Option<Interrupt>,
}

impl Interrupt {
    pub fn trigger(&self) {
        self.0.store(true, SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }

    /// Make this the flag observed by `interrupted()` on the current thread
    pub fn enter(&self) -> Entered {
        let prev = CURRENT.with(|current| current.replace(Some(self.clone())));
        Entered { prev }
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|current| *current.borrow_mut() = prev);
    }
}

/// How a job ended once a worker (or the caller) ran it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Outcome {
    Completed,
    Failed,
    // Cancelled while running; the result was thrown away
    Discarded,
}

/// Type-erased task as stored in the work queue.
///
/// `Job` is to `Task` what a trait object is to its concrete type: the pool
/// only ever deals in `JobBox` so a single queue can carry tasks with
/// different output types.
pub(crate) trait Job: Send + 'static {
    fn id(&self) -> TaskId;

    fn submitted_at(&self) -> Instant;

    fn interrupt(&self) -> &Interrupt;

    /// Transition the handle from pending to running. Returns `false` if the
    /// task was cancelled while it waited.
    fn start(&self) -> bool;

    /// Run a started task, delivering its result to the handle
    fn run_box(self: Box<Self>) -> Outcome;

    fn cancel(&self) -> bool;

    fn fail(&self, err: Error) -> bool;
}

pub(crate) type JobBox = Box<dyn Job>;

impl fmt::Debug for dyn Job {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Job")
           .field("id", &self.id())
           .finish()
    }
}

/// Pairs a task with the shared completion state of its handle
struct TaskCell<T: Task> {
    task: Option<T>,
    shared: Arc<Shared<T::Output>>,
}

/// Wrap `task` for the queue and return the handle observing it
pub(crate) fn job<T: Task>(id: TaskId, task: T) -> (JobBox, TaskHandle<T::Output>) {
    let shared = Arc::new(Shared::new(id));

    let cell = TaskCell {
        task: Some(task),
        shared: shared.clone(),
    };

    (Box::new(cell), TaskHandle::new(shared))
}

impl<T: Task> Job for TaskCell<T> {
    fn id(&self) -> TaskId {
        self.shared.id()
    }

    fn submitted_at(&self) -> Instant {
        self.shared.submitted_at()
    }

    fn interrupt(&self) -> &Interrupt {
        self.shared.interrupt()
    }

    fn start(&self) -> bool {
        self.shared.start()
    }

    fn run_box(mut self: Box<Self>) -> Outcome {
        let task = match self.task.take() {
            Some(task) => task,
            None => return Outcome::Discarded,
        };

        let _entered = self.shared.interrupt().enter();

        // AssertUnwindSafe is used because `Task` is `Send + 'static`, which
        // is essentially unwind safe
        let result = match panic::catch_unwind(AssertUnwindSafe(move || task.run())) {
            Ok(Ok(val)) => Ok(val),
            Ok(Err(err)) => Err(Error::task_failed(err)),
            Err(payload) => {
                let panicked = TaskPanicked::from_payload(payload);
                warn!(task = %self.id(), message = panicked.message(), "task panicked");
                Err(Error::task_failed(Box::new(panicked)))
            }
        };

        let failed = result.is_err();

        if !self.shared.complete(result) {
            Outcome::Discarded
        } else if failed {
            Outcome::Failed
        } else {
            Outcome::Completed
        }
    }

    fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    fn fail(&self, err: Error) -> bool {
        self.shared.fail(err)
    }
}

impl<T: Task> Drop for TaskCell<T> {
    fn drop(&mut self) {
        // A job dropped before resolving its handle (for example when the
        // worker thread could not be spawned) must not leave waiters hanging.
        self.shared.cancel();
    }
}
