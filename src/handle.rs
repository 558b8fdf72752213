use crate::error::Error;
use crate::task::{Interrupt, TaskId};

use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Observable state of a submitted task.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    /// Waiting in the queue or about to be handed to a worker
    Pending,
    /// Currently executing
    Running,
    /// Finished and produced a value
    Completed,
    /// Finished with an error, a panic, or was refused by the pool
    Failed,
    /// Cancelled before producing a result
    Cancelled,
}

impl TaskState {
    /// Returns `true` for the three terminal states
    pub fn is_terminal(&self) -> bool {
        match *self {
            TaskState::Pending | TaskState::Running => false,
            _ => true,
        }
    }
}

/// A handle to the eventual outcome of a submitted task.
///
/// The outcome is set at most once. Once a terminal state has been observed,
/// every later read returns the same state.
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

// Completion state shared between a handle and the job carrying the task
pub(crate) struct Shared<T> {
    id: TaskId,
    submitted_at: Instant,
    interrupt: Interrupt,
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

enum Slot<T> {
    Pending,
    Running,
    Completed(T),
    Failed(Error),
    Cancelled,
    // The value was moved out by `TaskHandle::join`
    Taken,
}

impl<T> Slot<T> {
    fn state(&self) -> TaskState {
        match *self {
            Slot::Pending => TaskState::Pending,
            Slot::Running => TaskState::Running,
            Slot::Completed(_) | Slot::Taken => TaskState::Completed,
            Slot::Failed(_) => TaskState::Failed,
            Slot::Cancelled => TaskState::Cancelled,
        }
    }

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

// ===== impl TaskHandle =====

impl<T> TaskHandle<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> TaskHandle<T> {
        TaskHandle { shared }
    }

    /// Returns the identifier assigned at submission
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Returns the instant the task was submitted
    pub fn submitted_at(&self) -> Instant {
        self.shared.submitted_at
    }

    /// Returns the current state of the task
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Returns `true` once the task reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Attempt to cancel the task.
    ///
    /// A task still waiting in the queue is skipped when a worker reaches it.
    /// A running task is not stopped; its interrupt flag is raised (see
    /// [`interrupted`](fn.interrupted.html)) and whatever it returns is
    /// discarded. Returns `false` if the task had already finished.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Block until the task finishes and take its result.
    pub fn join(self) -> Result<T, Error> {
        let mut slot = self.shared.lock();

        while !slot.is_terminal() {
            slot = self.shared.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }

        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Completed(val) => Ok(val),
            Slot::Failed(err) => {
                *slot = Slot::Failed(err.clone());
                Err(err)
            }
            Slot::Cancelled => {
                *slot = Slot::Cancelled;
                Err(Error::Cancelled)
            }
            Slot::Pending | Slot::Running | Slot::Taken => unreachable!(),
        }
    }

    /// Wait up to `timeout` for the task to reach a terminal state.
    ///
    /// Returns `false` if the wait elapsed first. Once it returns `true`,
    /// `join` returns without blocking, which gives a bounded wait for
    /// outputs that are not `Clone`.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.shared.wait_terminal(timeout).is_some()
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Wait up to `timeout` for the task to finish and return a copy of its
    /// result.
    ///
    /// `Error::Timeout` only means the wait elapsed. The task keeps running
    /// and a later call may still observe its result.
    pub fn get(&self, timeout: Duration) -> Result<T, Error> {
        let slot = self.shared.wait_terminal(timeout).ok_or(Error::Timeout)?;

        match *slot {
            Slot::Completed(ref val) => Ok(val.clone()),
            Slot::Failed(ref err) => Err(err.clone()),
            Slot::Cancelled => Err(Error::Cancelled),
            Slot::Pending | Slot::Running | Slot::Taken => unreachable!(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("TaskHandle")
           .field("id", &self.shared.id)
           .field("state", &self.state())
           .finish()
    }
}

// ===== impl Shared =====

impl<T> Shared<T> {
    pub fn new(id: TaskId) -> Shared<T> {
        Shared {
            id,
            submitted_at: Instant::now(),
            interrupt: Interrupt::default(),
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TaskState {
        self.lock().state()
    }

    // Returns the locked slot once terminal, `None` if `timeout` elapsed
    fn wait_terminal(&self, timeout: Duration) -> Option<MutexGuard<'_, Slot<T>>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();

        while !slot.is_terminal() {
            let now = Instant::now();

            if now >= deadline {
                return None;
            }

            slot = self.done.wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        Some(slot)
    }

    pub fn start(&self) -> bool {
        let mut slot = self.lock();

        match *slot {
            Slot::Pending => {
                *slot = Slot::Running;
                true
            }
            _ => false,
        }
    }

    /// Store the result of a run. Returns `false` if the task was cancelled
    /// while running, in which case the result is dropped.
    pub fn complete(&self, result: Result<T, Error>) -> bool {
        let mut slot = self.lock();

        if slot.is_terminal() {
            return false;
        }

        *slot = match result {
            Ok(val) => Slot::Completed(val),
            Err(err) => Slot::Failed(err),
        };

        self.done.notify_all();
        true
    }

    /// Fail a task that never ran
    pub fn fail(&self, err: Error) -> bool {
        let mut slot = self.lock();

        if slot.is_terminal() {
            return false;
        }

        *slot = Slot::Failed(err);
        self.done.notify_all();
        true
    }

    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();

        match *slot {
            Slot::Pending => {}
            Slot::Running => self.interrupt.trigger(),
            _ => return false,
        }

        *slot = Slot::Cancelled;
        self.done.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn shared() -> Arc<Shared<u32>> {
        Arc::new(Shared::new(TaskId::new(1)))
    }

    #[test]
    fn terminal_state_is_set_once() {
        let shared = shared();
        let handle = TaskHandle::new(shared.clone());

        assert!(shared.start());
        assert!(shared.complete(Ok(7)));
        assert!(!shared.complete(Ok(8)));
        assert!(!shared.cancel());
        assert!(!handle.cancel());

        for _ in 0..3 {
            assert_eq!(7, handle.get(Duration::from_millis(0)).unwrap());
            assert_eq!(TaskState::Completed, handle.state());
        }
    }

    #[test]
    fn cancel_pending_prevents_start() {
        let shared = shared();
        let handle = TaskHandle::new(shared.clone());

        assert!(handle.cancel());
        assert!(!shared.start());
        assert!(handle.get(Duration::from_millis(0)).unwrap_err().is_cancelled());
    }

    #[test]
    fn cancel_running_raises_interrupt_and_discards_result() {
        let shared = shared();
        let handle = TaskHandle::new(shared.clone());

        assert!(shared.start());
        assert!(handle.cancel());
        assert!(shared.interrupt().is_set());
        assert!(!shared.complete(Ok(1)));
        assert_eq!(TaskState::Cancelled, handle.state());
    }

    #[test]
    fn get_times_out_while_pending() {
        let handle = TaskHandle::new(shared());

        let err = handle.get(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(TaskState::Pending, handle.state());
    }

    #[test]
    fn wait_bounds_join_for_non_clone_output() {
        struct NotClone(u32);

        let shared = Arc::new(Shared::new(TaskId::new(2)));
        let handle = TaskHandle::new(shared.clone());

        assert!(!handle.wait(Duration::from_millis(20)));
        assert_eq!(TaskState::Pending, handle.state());

        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            shared.start();
            shared.complete(Ok(NotClone(9)));
        });

        assert!(handle.wait(Duration::from_secs(5)));
        assert_eq!(9, handle.join().unwrap().0);
        th.join().unwrap();
    }

    #[test]
    fn join_waits_for_completion() {
        let shared = shared();
        let handle = TaskHandle::new(shared.clone());

        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            shared.start();
            shared.complete(Ok(42));
        });

        assert_eq!(42, handle.join().unwrap());
        th.join().unwrap();
    }

    #[test]
    fn failure_is_repeatable() {
        let shared = shared();
        let handle = TaskHandle::new(shared.clone());

        assert!(shared.fail(Error::PoolSaturated));

        for _ in 0..2 {
            match handle.get(Duration::from_millis(0)) {
                Err(Error::PoolSaturated) => {}
                res => panic!("unexpected result: {:?}", res),
            }
        }
    }
}
