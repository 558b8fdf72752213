use crate::error::{BoxError, Error};
use crate::handle::TaskHandle;
use crate::queue::{EnqueueError, TaskQueue};
use crate::rejection::RejectionPolicy;
use crate::state::{Control, Lifecycle, PoolState, WorkerInfo, WorkerKind};
use crate::task::{self, Interrupt, JobBox, Outcome, Task, TaskId};
use crate::worker::Worker;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::atomic::Ordering::Relaxed;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Execute tasks on one of possibly several pooled threads.
///
/// `ThreadPool` is a cheap handle; clones share the same pool. When the last
/// handle is dropped the pool shuts down gracefully, finishing queued tasks.
///
/// For more details, see the [library level documentation](./index.html).
pub struct ThreadPool {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

/// Thread pool configuration.
///
/// Provide detailed control over the properties and behavior of the thread
/// pool.
#[derive(Debug)]
pub struct Builder {
    // Thread pool specific configuration values
    thread_pool: Config,

    // Max number of tasks that can be pending in the work queue
    work_queue_capacity: usize,
}

/// Thread pool specific configuration values
pub(crate) struct Config {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub keep_alive: Duration,
    pub allow_core_thread_timeout: bool,
    pub rejection_policy: RejectionPolicy,
    // Used to configure a worker thread
    pub name_prefix: Option<String>,
    pub stack_size: Option<usize>,
    pub after_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub before_stop: Option<Arc<dyn Fn() + Send + Sync>>,
    // Used to observe each task run by a worker
    pub before_execute: Option<Arc<dyn Fn(TaskId) + Send + Sync>>,
    pub after_execute: Option<Arc<dyn Fn(TaskId, Duration, bool) + Send + Sync>>,
}

/// A task that was still queued when `shutdown_now` ran.
///
/// Its handle has been resolved as cancelled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UnstartedTask {
    id: TaskId,
    submitted_at: Instant,
}

/// Snapshot of pool counters, see `ThreadPool::stats`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PoolStats {
    /// Live workers
    pub workers: usize,
    /// Workers currently running a task
    pub busy_workers: usize,
    /// Highest number of live workers ever reached
    pub largest_workers: usize,
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Tasks accepted by `submit`, rejected ones included
    pub submitted: usize,
    /// Tasks that ran to the end, successfully or not
    pub completed: usize,
    /// Tasks that returned an error or panicked
    pub failed: usize,
    /// Submissions handed to the rejection policy
    pub rejected: usize,
    /// Time spent running tasks, summed over all workers
    pub total_run_time: Duration,
}

pub(crate) struct Inner {
    // The lifecycle, the worker set and the live worker count change together
    // and are only ever touched under this lock. Task code never runs while
    // it is held.
    //
    // The lifecycle takes on the values:
    //
    //   Running:    Accept new tasks and process queued tasks
    //   Shutdown:   Don't accept new tasks, but process queued tasks
    //   Stop:       Don't accept new tasks, don't process queued tasks, and
    //               interrupt in-progress tasks
    //   Terminated: All workers have exited
    //
    // Detecting the transition from Shutdown to Terminated relies on the
    // queue: it is closed on shutdown, so workers only leave once it has been
    // drained, and the last one out terminates the pool.
    control: Mutex<Control>,

    // Signaled when the pool terminates
    termination_signal: Condvar,

    pub queue: TaskQueue<JobBox>,

    next_task_id: AtomicU64,

    // Used to name threads
    pub next_thread_id: AtomicUsize,

    counters: Counters,

    pub config: Config,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    rejected: AtomicUsize,
    run_nanos: AtomicU64,
}

// Shuts the pool down once every `ThreadPool` handle is gone. Workers only
// hold `Inner`, so they do not keep it alive.
struct Owner {
    inner: Arc<Inner>,
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        ThreadPool {
            inner: self.inner.clone(),
            _owner: self._owner.clone(),
        }
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        const SOME: &&str = &"Some(_)";
        const NONE: &&str = &"None";

        fmt.debug_struct("ThreadPool")
           .field("core_pool_size", &self.core_pool_size)
           .field("max_pool_size", &self.max_pool_size)
           .field("keep_alive", &self.keep_alive)
           .field("allow_core_thread_timeout", &self.allow_core_thread_timeout)
           .field("rejection_policy", &self.rejection_policy)
           .field("name_prefix", &self.name_prefix)
           .field("stack_size", &self.stack_size)
           .field("after_start", if self.after_start.is_some() { SOME } else { NONE })
           .field("before_stop", if self.before_stop.is_some() { SOME } else { NONE })
           .field("before_execute", if self.before_execute.is_some() { SOME } else { NONE })
           .field("after_execute", if self.after_execute.is_some() { SOME } else { NONE })
           .finish()
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadPool")
           .field("state", &self.state())
           .field("workers", &self.active_worker_count())
           .field("queued", &self.queued_task_count())
           .finish()
    }
}

// ===== impl Builder =====

impl Builder {
    /// Returns a builder with default values
    pub fn new() -> Builder {
        let num_cpus = num_cpus::get();

        Builder {
            thread_pool: Config {
                core_pool_size: num_cpus,
                max_pool_size: num_cpus,
                keep_alive: Duration::from_secs(60),
                allow_core_thread_timeout: false,
                rejection_policy: RejectionPolicy::Abort,
                name_prefix: None,
                stack_size: None,
                after_start: None,
                before_stop: None,
                before_execute: None,
                after_execute: None,
            },
            work_queue_capacity: 64 * 1_024,
        }
    }

    /// Set the thread pool's core size.
    ///
    /// The number of threads to keep in the pool, even if they are idle.
    pub fn core_pool_size(mut self, val: usize) -> Self {
        self.thread_pool.core_pool_size = val;
        self
    }

    /// Set the thread pool's maximum size
    ///
    /// The maximum number of threads to allow in the pool.
    pub fn max_pool_size(mut self, val: usize) -> Self {
        self.thread_pool.max_pool_size = val;
        self
    }

    /// Set the thread keep alive duration
    ///
    /// When the number of threads is greater than core target or core threads
    /// are allowed to timeout, this is the maximum time that idle threads will
    /// wait for new tasks before terminating.
    pub fn keep_alive(mut self, val: Duration) -> Self {
        self.thread_pool.keep_alive = val;
        self
    }

    /// Allow core threads to timeout
    pub fn allow_core_thread_timeout(mut self) -> Self {
        self.thread_pool.allow_core_thread_timeout = true;
        self
    }

    /// Maximum number of jobs that can be pending in the work queue
    ///
    /// With a capacity of zero nothing is ever queued: a task either gets a
    /// fresh worker or is rejected.
    pub fn work_queue_capacity(mut self, val: usize) -> Self {
        self.work_queue_capacity = val;
        self
    }

    /// Set what happens to tasks submitted while the pool is saturated
    pub fn rejection_policy(mut self, val: RejectionPolicy) -> Self {
        self.thread_pool.rejection_policy = val;
        self
    }

    /// Set name prefix of threads spawned by the pool
    ///
    /// Thread name prefix is used for generating thread names. For example, if
    /// prefix is `my-pool-`, then threads in the pool will get names like
    /// `my-pool-1` etc.
    pub fn name_prefix<S: Into<String>>(mut self, val: S) -> Self {
        self.thread_pool.name_prefix = Some(val.into());
        self
    }

    /// Set the stack size of threads spawned by the pool
    pub fn stack_size(mut self, val: usize) -> Self {
        self.thread_pool.stack_size = Some(val);
        self
    }

    /// Execute function `f` right after each thread is started but before
    /// running any tasks on it
    ///
    /// This is initially intended for bookkeeping and monitoring uses
    pub fn after_start<F>(mut self, f: F) -> Self
        where F: Fn() + Send + Sync + 'static
    {
        self.thread_pool.after_start = Some(Arc::new(f));
        self
    }

    /// Execute function `f` before each worker thread stops
    ///
    /// This is initially intended for bookkeeping and monitoring uses
    pub fn before_stop<F>(mut self, f: F) -> Self
        where F: Fn() + Send + Sync + 'static
    {
        self.thread_pool.before_stop = Some(Arc::new(f));
        self
    }

    /// Execute function `f` on the worker thread right before it runs a task
    ///
    /// `f` receives the task's identifier. Tasks run by the `CallerRuns`
    /// policy on the submitting thread skip it.
    pub fn before_execute<F>(mut self, f: F) -> Self
        where F: Fn(TaskId) + Send + Sync + 'static
    {
        self.thread_pool.before_execute = Some(Arc::new(f));
        self
    }

    /// Execute function `f` on the worker thread right after a task returns
    ///
    /// `f` receives the task's identifier, how long it ran and whether it
    /// failed (returned an error or panicked).
    pub fn after_execute<F>(mut self, f: F) -> Self
        where F: Fn(TaskId, Duration, bool) + Send + Sync + 'static
    {
        self.thread_pool.after_execute = Some(Arc::new(f));
        self
    }

    /// Build and return the configured thread pool
    ///
    /// No thread is started until the first task is submitted.
    ///
    /// # Panics
    ///
    /// Panics if `max_pool_size` is zero or smaller than `core_pool_size`.
    pub fn build(self) -> ThreadPool {
        assert!(self.thread_pool.max_pool_size >= 1, "at least one thread required");
        assert!(self.thread_pool.core_pool_size <= self.thread_pool.max_pool_size,
                "`core_pool_size` cannot be greater than `max_pool_size`");

        let inner = Arc::new(Inner {
            // Thread pool starts in the running state
            control: Mutex::new(Control::new()),
            termination_signal: Condvar::new(),
            queue: TaskQueue::new(self.work_queue_capacity),
            next_task_id: AtomicU64::new(1),
            next_thread_id: AtomicUsize::new(1),
            counters: Counters::default(),
            config: self.thread_pool,
        });

        ThreadPool {
            _owner: Arc::new(Owner { inner: inner.clone() }),
            inner,
        }
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl ThreadPool {
    /// Create a thread pool from its core parameters.
    ///
    /// Shorthand for the equivalent `Builder` calls.
    ///
    /// # Panics
    ///
    /// Panics if `max_count` is zero or smaller than `core_count`.
    pub fn new(core_count: usize,
               max_count: usize,
               queue_capacity: usize,
               idle_timeout: Duration,
               rejection_policy: RejectionPolicy) -> ThreadPool {
        Builder::new()
            .core_pool_size(core_count)
            .max_pool_size(max_count)
            .work_queue_capacity(queue_capacity)
            .keep_alive(idle_timeout)
            .rejection_policy(rejection_policy)
            .build()
    }

    /// Returns a builder with default values
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Create a thread pool that reuses a fixed number of threads operating off
    /// a shared unbounded queue.
    ///
    /// At any point, at most `size` threads will be active processing tasks. If
    /// additional tasks are submitted when all threads are active, they will
    /// wait in the queue until a thread is available. The threads in the pool
    /// will exist until the thread pool is explicitly shutdown.
    pub fn fixed_size(size: usize) -> ThreadPool {
        Builder::new()
            .core_pool_size(size)
            .max_pool_size(size)
            .work_queue_capacity(usize::MAX)
            .build()
    }

    /// Create a thread pool with a single worker thread operating off an
    /// unbounded queue.
    ///
    /// Tasks are guaranteed to execute sequentially, and no more than one task
    /// will be active at any given time.
    pub fn single_thread() -> ThreadPool {
        ThreadPool::fixed_size(1)
    }

    /// Create a thread pool that spawns threads as needed and reuses idle
    /// ones.
    ///
    /// Nothing is ever queued: a task is handed to an idle worker or to a new
    /// one. Threads idle for 60 seconds retire, so a pool left alone holds no
    /// threads.
    pub fn cached() -> ThreadPool {
        Builder::new()
            .core_pool_size(0)
            .max_pool_size(usize::MAX)
            .work_queue_capacity(0)
            .keep_alive(Duration::from_secs(60))
            .build()
    }

    /// Submit a task, returning a handle to its outcome.
    ///
    /// The pool decides, in this order:
    ///
    /// 1. fewer than `core_pool_size` workers: spawn a core worker and hand it
    ///    the task directly;
    /// 2. otherwise queue the task if the work queue has room;
    /// 3. otherwise spawn an overflow worker if fewer than `max_pool_size`
    ///    exist, handing it the task directly;
    /// 4. otherwise apply the rejection policy. The returned handle reflects
    ///    the policy: failed with `Error::PoolSaturated` for `Abort`, cancelled
    ///    for `Discard`.
    ///
    /// Only queued tasks keep their relative submission order.
    ///
    /// # Errors
    ///
    /// `Error::PoolTerminated` once `shutdown` or `shutdown_now` has been
    /// called, `Error::WorkerSpawn` if a needed thread could not be started.
    pub fn submit<T: Task>(&self, task: T) -> Result<TaskHandle<T::Output>, Error> {
        let (job, handle) = self.inner.new_job(task);

        let rejected = self.inner.admit(job)?;
        self.inner.counters.submitted.fetch_add(1, Relaxed);

        if let Some(job) = rejected {
            self.inner.counters.rejected.fetch_add(1, Relaxed);
            self.inner.config.rejection_policy.handle(job, self);
        }

        Ok(handle)
    }

    /// Submit a task, blocking for up to `timeout` while the pool is
    /// saturated.
    ///
    /// Behaves like `submit` except that instead of applying the rejection
    /// policy it waits for room in the work queue.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if no room freed up in time (a zero capacity queue
    /// times out immediately), `Error::PoolTerminated` if the pool is or gets
    /// shut down meanwhile.
    pub fn submit_timeout<T: Task>(&self, task: T, timeout: Duration)
        -> Result<TaskHandle<T::Output>, Error>
    {
        let (job, handle) = self.inner.new_job(task);

        if let Some(job) = self.inner.admit(job)? {
            // At capacity with all threads spawned, so block on the queue.
            // A job that never makes it in is dropped, cancelling its handle.
            match self.inner.queue.enqueue_blocking(job, timeout) {
                Ok(()) => {
                    let mut control = self.inner.lock();
                    self.inner.ensure_worker(&mut control);
                }
                Err(EnqueueError::Timeout(_)) => return Err(Error::Timeout),
                Err(EnqueueError::Closed(_)) => return Err(Error::PoolTerminated),
            }
        }

        self.inner.counters.submitted.fetch_add(1, Relaxed);
        Ok(handle)
    }

    /// Submit a closure that cannot fail
    pub fn execute<F>(&self, f: F) -> Result<TaskHandle<()>, Error>
        where F: FnOnce() + Send + 'static
    {
        self.submit(move || {
            f();
            Ok::<(), BoxError>(())
        })
    }

    /// Start a core thread, causing it to idly wait for work.
    ///
    /// This overrides the default policy of starting core threads only when new
    /// tasks are executed. This function will return `false` if all core
    /// threads have already been started.
    pub fn prestart_core_thread(&self) -> bool {
        let mut control = self.inner.lock();

        if control.lifecycle() != Lifecycle::Running
            || control.live_count() >= self.inner.config.core_pool_size
        {
            return false;
        }

        self.inner.add_worker(&mut control, WorkerKind::Core, None).is_ok()
    }

    /// Start all core threads, causing them to idly wait for work.
    ///
    /// This overrides the default policy of starting core threads only when new
    /// tasks are executed.
    pub fn prestart_core_threads(&self) {
        while self.prestart_core_thread() {}
    }

    /// Initiate an orderly shutdown.
    ///
    /// Any previously submitted tasks are executed, but no new tasks will be
    /// accepted. Invocation has no additional effect if the thread pool has
    /// already been shut down.
    ///
    /// This function will not wait for previously submitted tasks to complete
    /// execution. Use `await_termination` to do that.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Shutdown the thread pool as fast as possible.
    ///
    /// Queued tasks are removed without running, their handles cancelled, and
    /// returned. Running tasks have their interrupt flag raised but are
    /// allowed to finish; workers exit as soon as their current task returns.
    pub fn shutdown_now(&self) -> Vec<UnstartedTask> {
        self.inner.shutdown_now()
    }

    /// Returns the lifecycle state of the pool
    pub fn state(&self) -> PoolState {
        self.inner.lock().lifecycle().public()
    }

    /// Returns `true` once `shutdown` or `shutdown_now` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().lifecycle() != Lifecycle::Running
    }

    /// Returns `true` if the thread pool is in the process of terminating but
    /// has not yet terminated.
    pub fn is_terminating(&self) -> bool {
        self.state() == PoolState::ShuttingDown
    }

    /// Returns `true` if the thread pool is currently terminated.
    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    /// Blocks the current thread until the thread pool has terminated or
    /// `timeout` elapses. Returns `true` if termination was observed.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.inner.lock();

        while control.lifecycle() != Lifecycle::Terminated {
            let now = Instant::now();

            if now >= deadline {
                return false;
            }

            control = self.inner.termination_signal
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        true
    }

    /// Returns the current number of live worker threads
    pub fn active_worker_count(&self) -> usize {
        self.inner.lock().live_count()
    }

    /// Returns the number of workers currently running a task
    pub fn busy_worker_count(&self) -> usize {
        self.inner.lock().busy_count()
    }

    /// Returns the largest number of workers the pool ever had at once
    pub fn largest_worker_count(&self) -> usize {
        self.inner.lock().largest_count()
    }

    /// Returns the current number of pending tasks
    ///
    /// Tasks cancelled through their handle stay in the queue, and in this
    /// count, until a worker skips over them.
    pub fn queued_task_count(&self) -> usize {
        self.inner.queue.size()
    }

    /// Returns the number of tasks accepted so far
    pub fn submitted_task_count(&self) -> usize {
        self.inner.counters.submitted.load(Relaxed)
    }

    /// Returns the number of tasks that ran to the end, failed ones included
    pub fn completed_task_count(&self) -> usize {
        self.inner.counters.completed.load(Relaxed)
    }

    /// Returns a snapshot of every worker thread that has not exited yet
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.inner.lock().snapshot()
    }

    /// Returns a snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        let (workers, busy_workers, largest_workers) = {
            let control = self.inner.lock();
            (control.live_count(), control.busy_count(), control.largest_count())
        };

        let counters = &self.inner.counters;

        PoolStats {
            workers,
            busy_workers,
            largest_workers,
            queued: self.inner.queue.size(),
            submitted: counters.submitted.load(Relaxed),
            completed: counters.completed.load(Relaxed),
            failed: counters.failed.load(Relaxed),
            rejected: counters.rejected.load(Relaxed),
            total_run_time: Duration::from_nanos(counters.run_nanos.load(Relaxed)),
        }
    }

    // Used by the `CallerRuns` rejection policy
    pub(crate) fn run_in_caller(&self, job: JobBox) {
        if job.start() {
            let start = Instant::now();
            let outcome = job.run_box();
            self.inner.record(outcome, start.elapsed());
        }
    }

    // Used by the `DiscardOldest` rejection policy
    pub(crate) fn replace_oldest(&self, job: JobBox) {
        let control = self.inner.lock();

        // A zero capacity queue only holds jobs handed off to idle workers
        if control.lifecycle() != Lifecycle::Running || self.inner.queue.capacity() == 0 {
            job.cancel();
            return;
        }

        match self.inner.queue.try_dequeue() {
            Some(oldest) => {
                debug!(task = %oldest.id(), "discarding oldest queued task");
                oldest.cancel();

                if let Err(job) = self.inner.queue.enqueue(job) {
                    // A blocked submitter took the freed slot
                    job.cancel();
                }
            }
            None => {
                // Saturation came from busy workers, not from the queue
                job.cancel();
            }
        }
    }
}

// ===== impl PoolStats =====

impl PoolStats {
    /// Mean time a task spent running, zero if none completed
    pub fn average_run_time(&self) -> Duration {
        if self.completed == 0 {
            return Duration::from_secs(0);
        }

        let nanos = self.total_run_time.as_nanos() / self.completed as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

// ===== impl UnstartedTask =====

impl UnstartedTask {
    /// Returns the identifier of the task
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the instant the task was submitted
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

// ===== impl Inner =====

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_job<T: Task>(&self, task: T) -> (JobBox, TaskHandle<T::Output>) {
        let id = TaskId::new(self.next_task_id.fetch_add(1, Relaxed));
        task::job(id, task)
    }

    // Run the admission rule. Returns the job back if the pool is saturated.
    fn admit(self: &Arc<Self>, job: JobBox) -> Result<Option<JobBox>, Error> {
        let mut control = self.lock();

        if control.lifecycle() != Lifecycle::Running {
            return Err(Error::PoolTerminated);
        }

        if control.live_count() < self.config.core_pool_size {
            self.add_worker(&mut control, WorkerKind::Core, Some(job))?;
            return Ok(None);
        }

        // A zero capacity queue still passes work to workers already
        // waiting on it
        let job = if self.queue.capacity() == 0
            && control.idle_count() > self.queue.size()
        {
            match self.queue.handoff(job) {
                Ok(()) => return Ok(None),
                Err(job) => job,
            }
        } else {
            job
        };

        let job = match self.queue.enqueue(job) {
            Ok(()) => {
                // With no core workers, or all of them timed out, nobody may
                // be left to pick the job up.
                self.ensure_worker(&mut control);
                return Ok(None);
            }
            Err(job) => job,
        };

        if control.live_count() < self.config.max_pool_size {
            self.add_worker(&mut control, WorkerKind::Overflow, Some(job))?;
            return Ok(None);
        }

        Ok(Some(job))
    }

    fn add_worker(self: &Arc<Self>,
                  control: &mut Control,
                  kind: WorkerKind,
                  job: Option<JobBox>) -> Result<(), Error> {
        debug_assert!(control.lifecycle() < Lifecycle::Stop);

        let id = control.register(kind, job.is_some());

        debug_assert!(control.live_count() <= self.config.max_pool_size,
                      "worker count exceeds `max_pool_size`");

        // == Spawn the thread ==

        match Worker::new(id, kind, self.clone()).spawn(job) {
            Ok(()) => Ok(()),
            Err(err) => {
                // The closure owning the job was dropped, cancelling its handle
                control.unregister(id);
                warn!(worker = id, error = %err, "failed to spawn worker thread");
                Err(err.into())
            }
        }
    }

    // Spawn a worker if jobs are queued but every worker is gone
    fn ensure_worker(self: &Arc<Self>, control: &mut Control) {
        if control.live_count() > 0
            || control.lifecycle() >= Lifecycle::Stop
            || self.queue.is_empty()
        {
            return;
        }

        let kind = if control.live_count() < self.config.core_pool_size {
            WorkerKind::Core
        } else {
            WorkerKind::Overflow
        };

        // On failure the job stays queued for the next worker to come along
        let _ = self.add_worker(control, kind, None);
    }

    fn shutdown(self: &Arc<Self>) {
        let mut control = self.lock();

        if control.transition_to_shutdown() {
            info!(queued = self.queue.size(), "thread pool shutting down");
        }

        self.queue.close();

        // Make sure someone is around to drain the queue
        self.ensure_worker(&mut control);
        self.try_terminate(&mut control);
    }

    fn shutdown_now(self: &Arc<Self>) -> Vec<UnstartedTask> {
        let drained = {
            let mut control = self.lock();

            if control.transition_to_stop() {
                info!(queued = self.queue.size(), "thread pool stopping");
            }

            self.queue.close();

            let drained = self.queue.drain();

            control.interrupt_all();
            self.try_terminate(&mut control);

            drained
        };

        drained.into_iter()
            // Jobs cancelled through their handle were never pending work
            .filter(|job| job.cancel())
            .map(|job| UnstartedTask {
                id: job.id(),
                submitted_at: job.submitted_at(),
            })
            .collect()
    }

    fn try_terminate(&self, control: &mut Control) {
        if control.try_terminate() {
            info!("thread pool terminated");

            // Notify all pending threads
            self.termination_signal.notify_all();
        }
    }

    pub(crate) fn record(&self, outcome: Outcome, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.counters.run_nanos.fetch_add(nanos, Relaxed);
        self.counters.completed.fetch_add(1, Relaxed);

        if outcome == Outcome::Failed {
            self.counters.failed.fetch_add(1, Relaxed);
        }
    }

    // ===== worker callbacks =====

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().lifecycle() >= Lifecycle::Stop
    }

    pub(crate) fn worker_busy(&self, id: usize, interrupt: &Interrupt) {
        let mut control = self.lock();

        // shutdown_now may have run between dequeue and now
        if control.lifecycle() >= Lifecycle::Stop {
            interrupt.trigger();
        }

        control.mark_running(id, interrupt.clone());
    }

    pub(crate) fn worker_idle(&self, id: usize) {
        self.lock().mark_idle(id);
    }

    /// Called by a worker whose keep alive elapsed. Returns `true` if the
    /// worker may exit.
    pub(crate) fn try_retire(&self, id: usize) -> bool {
        let mut control = self.lock();

        // Work queued (or handed off) since the dequeue timed out
        if !self.queue.is_empty() {
            return false;
        }

        let retired = control.retire(id);

        if retired {
            debug!(worker = id, "idle worker retiring");
        }

        retired
    }

    pub(crate) fn worker_exited(self: &Arc<Self>, id: usize) {
        let mut control = self.lock();

        control.unregister(id);
        debug!(worker = id, "worker exited");

        // A worker that died early may leave queued work behind
        self.ensure_worker(&mut control);
        self.try_terminate(&mut control);
    }
}
