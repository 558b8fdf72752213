use crate::error::TaskPanicked;
use crate::queue::Dequeue;
use crate::state::WorkerKind;
use crate::task::{JobBox, Outcome};
use crate::thread_pool::Inner;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Tracks state associated with a worker thread
pub(crate) struct Worker {
    id: usize,
    kind: WorkerKind,
    // Shared thread pool state
    inner: Arc<Inner>,
}

// Deregisters the worker when its thread leaves `run`, including by panic
struct ExitGuard<'a> {
    id: usize,
    inner: &'a Arc<Inner>,
}

impl Worker {
    pub fn new(id: usize, kind: WorkerKind, inner: Arc<Inner>) -> Worker {
        Worker { id, kind, inner }
    }

    pub fn spawn(self, initial_job: Option<JobBox>) -> io::Result<()> {
        let mut b = thread::Builder::new();

        {
            let c = &self.inner.config;

            if let Some(stack_size) = c.stack_size {
                b = b.stack_size(stack_size);
            }

            if let Some(ref name_prefix) = c.name_prefix {
                let i = self.inner.next_thread_id.fetch_add(1, Relaxed);
                b = b.name(format!("{}{}", name_prefix, i));
            }
        }

        b.spawn(move || self.run(initial_job)).map(|_| ())
    }

    fn run(self, mut initial_job: Option<JobBox>) {
        let _exit = ExitGuard {
            id: self.id,
            inner: &self.inner,
        };

        debug!(worker = self.id, kind = ?self.kind, "worker started");

        if let Some(ref f) = self.inner.config.after_start {
            self.call_hook("after_start", || f());
        }

        while let Some(job) = self.next_job(initial_job.take()) {
            self.execute(job);
        }

        if let Some(ref f) = self.inner.config.before_stop {
            self.call_hook("before_stop", || f());
        }
    }

    fn execute(&self, job: JobBox) {
        let task = job.id();
        let config = &self.inner.config;

        self.inner.worker_busy(self.id, job.interrupt());

        if let Some(ref f) = config.before_execute {
            self.call_hook("before_execute", || f(task));
        }

        let start = Instant::now();
        let outcome = job.run_box();
        let elapsed = start.elapsed();

        if let Some(ref f) = config.after_execute {
            self.call_hook("after_execute", || f(task, elapsed, outcome == Outcome::Failed));
        }

        self.inner.worker_idle(self.id);
        self.inner.record(outcome, elapsed);
    }

    // Hook panics are logged and never unwind past the worker
    fn call_hook<F: FnOnce()>(&self, hook: &str, f: F) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let panicked = TaskPanicked::from_payload(payload);
            warn!(worker = self.id, hook, message = panicked.message(), "hook panicked");
        }
    }

    // Gets the next job, blocking if necessary. Returns None if the worker
    // should exit.
    fn next_job(&self, mut job: Option<JobBox>) -> Option<JobBox> {
        // Did the last dequeue time out?
        let mut timed_out = false;
        let keep_alive = self.keep_alive();

        loop {
            if self.inner.is_stopped() {
                // A job grabbed while shutdown_now ran is never started
                if let Some(job) = job {
                    job.cancel();
                }

                return None;
            }

            if let Some(job) = job.take() {
                if job.start() {
                    return Some(job);
                }

                // Cancelled while it waited in the queue. A worker spawned with
                // this job was registered as busy.
                self.inner.worker_idle(self.id);
                continue;
            }

            if timed_out {
                if self.inner.try_retire(self.id) {
                    return None;
                }

                timed_out = false;
            }

            let next = match keep_alive {
                Some(timeout) => self.inner.queue.dequeue_blocking(timeout),
                None => match self.inner.queue.dequeue_blocking_indefinite() {
                    Some(job) => Dequeue::Item(job),
                    None => Dequeue::Closed,
                },
            };

            match next {
                Dequeue::Item(next) => {
                    // Grab the job, but restart the loop in order to check
                    // the lifecycle again.
                    job = Some(next);
                }
                Dequeue::Timeout => {
                    timed_out = true;
                }
                Dequeue::Closed => {
                    // Shut down and fully drained
                    return None;
                }
            }
        }
    }

    // How long the worker may idle before retiring, `None` for forever
    fn keep_alive(&self) -> Option<Duration> {
        let config = &self.inner.config;

        if self.kind == WorkerKind::Overflow || config.allow_core_thread_timeout {
            Some(config.keep_alive)
        } else {
            None
        }
    }
}

impl<'a> Drop for ExitGuard<'a> {
    fn drop(&mut self) {
        self.inner.worker_exited(self.id);
    }
}
