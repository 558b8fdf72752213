use crate::task::Interrupt;

use std::collections::HashMap;

/// Lifecycle of a pool as reported by `ThreadPool::state`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PoolState {
    /// Accepting and running tasks
    Running,
    /// No longer accepting tasks; workers are finishing up
    ShuttingDown,
    /// Every worker has exited
    Terminated,
}

/// Why a worker exists.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerKind {
    /// Counted against `core_pool_size`; never retires for idleness unless
    /// core thread timeout is enabled
    Core,
    /// Spawned past the core size to absorb a burst; retires after sitting
    /// idle for the keep alive duration
    Overflow,
}

/// What a worker is doing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerState {
    /// Waiting for a task
    Idle,
    /// Executing a task
    Running,
    /// Left its loop and is about to exit
    Retired,
}

/// Point-in-time view of one worker, see `ThreadPool::workers`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WorkerInfo {
    /// Identifier, unique per pool
    pub id: usize,
    /// Core or overflow
    pub kind: WorkerKind,
    /// Current state
    pub state: WorkerState,
}

// The numerical order among these values matters, to allow ordered
// comparisons. The lifecycle monotonically increases over time, but need not
// hit each state. The transitions are:
//
//   Running -> Shutdown
//      On invocation of shutdown()
//
//   (Running or Shutdown) -> Stop
//      On invocation of shutdown_now()
//
//   (Shutdown or Stop) -> Terminated
//      When the last worker has exited
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Lifecycle {
    // Accept new tasks and process queued tasks
    Running = 0,
    // Don't accept new tasks, but process queued tasks
    Shutdown = 1,
    // Don't accept new tasks, don't process queued tasks, and interrupt
    // in-progress tasks
    Stop = 2,
    Terminated = 3,
}

impl Lifecycle {
    pub fn public(&self) -> PoolState {
        match *self {
            Lifecycle::Running => PoolState::Running,
            Lifecycle::Shutdown | Lifecycle::Stop => PoolState::ShuttingDown,
            Lifecycle::Terminated => PoolState::Terminated,
        }
    }
}

struct WorkerEntry {
    kind: WorkerKind,
    state: WorkerState,
    // Interrupt flag of the task being run, if any
    current: Option<Interrupt>,
}

/// Pool bookkeeping that must change together: the lifecycle, the worker set
/// and the live worker count. Always accessed under the pool's control lock.
pub(crate) struct Control {
    lifecycle: Lifecycle,
    workers: HashMap<usize, WorkerEntry>,
    // Workers that have not retired. Retired workers stay in `workers` until
    // their thread is done, but no longer count against the pool size.
    live: usize,
    largest: usize,
    next_worker_id: usize,
}

impl Control {
    pub fn new() -> Control {
        Control {
            lifecycle: Lifecycle::Running,
            workers: HashMap::new(),
            live: 0,
            largest: 0,
            next_worker_id: 1,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns `true` if the transition happened
    pub fn transition_to_shutdown(&mut self) -> bool {
        self.advance(Lifecycle::Shutdown)
    }

    /// Returns `true` if the transition happened
    pub fn transition_to_stop(&mut self) -> bool {
        self.advance(Lifecycle::Stop)
    }

    /// Terminate once no worker remains. Returns `true` on the transition.
    pub fn try_terminate(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Running || !self.workers.is_empty() {
            return false;
        }

        self.advance(Lifecycle::Terminated)
    }

    fn advance(&mut self, next: Lifecycle) -> bool {
        if self.lifecycle >= next {
            return false;
        }

        self.lifecycle = next;
        true
    }

    /// Number of workers that have not retired
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn busy_count(&self) -> usize {
        self.workers.values()
            .filter(|w| w.state == WorkerState::Running)
            .count()
    }

    /// Live workers not running a task
    pub fn idle_count(&self) -> usize {
        self.workers.values()
            .filter(|w| w.state == WorkerState::Idle)
            .count()
    }

    pub fn largest_count(&self) -> usize {
        self.largest
    }

    /// Add a worker and return its id. A worker spawned with a first task is
    /// `busy` from the start.
    pub fn register(&mut self, kind: WorkerKind, busy: bool) -> usize {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        self.workers.insert(id, WorkerEntry {
            kind,
            state: if busy { WorkerState::Running } else { WorkerState::Idle },
            current: None,
        });

        self.live += 1;
        self.largest = self.largest.max(self.live);

        id
    }

    /// Remove a worker whose thread is exiting
    pub fn unregister(&mut self, id: usize) {
        match self.workers.remove(&id) {
            Some(entry) => {
                if entry.state != WorkerState::Retired {
                    self.live -= 1;
                }
            }
            None => debug_assert!(false, "unknown worker {}", id),
        }

        debug_assert!(self.live <= self.workers.len());
    }

    pub fn mark_running(&mut self, id: usize, interrupt: Interrupt) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.state = WorkerState::Running;
            entry.current = Some(interrupt);
        }
    }

    pub fn mark_idle(&mut self, id: usize) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.state = WorkerState::Idle;
            entry.current = None;
        }
    }

    /// Stop counting the worker against the pool size. Returns `false` if
    /// it already retired.
    pub fn retire(&mut self, id: usize) -> bool {
        match self.workers.get_mut(&id) {
            Some(entry) if entry.state != WorkerState::Retired => {
                entry.state = WorkerState::Retired;
                entry.current = None;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Raise the interrupt flag of every running task
    pub fn interrupt_all(&self) {
        for entry in self.workers.values() {
            if let Some(ref interrupt) = entry.current {
                interrupt.trigger();
            }
        }
    }

    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<_> = self.workers.iter()
            .map(|(&id, entry)| WorkerInfo {
                id,
                kind: entry.kind,
                state: entry.state,
            })
            .collect();

        workers.sort_by_key(|w| w.id);
        workers
    }
}
