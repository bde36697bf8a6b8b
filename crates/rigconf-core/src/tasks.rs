//! Bounded worker pool for blocking boolean tasks.
//!
//! Tasks are queued first, then `start(n)` spins up workers that drain the
//! queue, and `finish()` joins them. Each task writes only to its own
//! [`TaskHandle`]; a task that panics resolves to `false`.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() -> bool + Send + 'static>;

struct Queued {
    job: Job,
    result: Sender<bool>,
}

/// Result slot of one queued task.
pub struct TaskHandle {
    rx: Receiver<bool>,
}

impl TaskHandle {
    /// Block until the task has run and return its result.
    pub fn get(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }
}

pub struct TaskPool {
    queue: Arc<Mutex<VecDeque<Queued>>>,
    workers: Vec<JoinHandle<()>>,
    max_workers: usize,
}

fn run(queued: Queued) {
    let ok = catch_unwind(AssertUnwindSafe(queued.job)).unwrap_or_else(|_| {
        warn!("task panicked; recording failure");
        false
    });
    let _ = queued.result.send(ok);
}

fn pop(queue: &Mutex<VecDeque<Queued>>) -> Option<Queued> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

impl TaskPool {
    pub const DEFAULT_MAX_WORKERS: usize = 32;

    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            workers: Vec::new(),
            max_workers: max_workers.max(1),
        }
    }

    pub fn queue<F>(&self, task: F) -> TaskHandle
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Queued {
                job: Box::new(task),
                result: tx,
            });
        TaskHandle { rx }
    }

    /// Spawn up to `n` workers, capped by the pool ceiling. Returns how many
    /// were actually spawned.
    pub fn start(&mut self, n: usize) -> usize {
        let wanted = n.min(self.max_workers);
        let mut spawned = 0;
        for i in 0..wanted {
            let queue = Arc::clone(&self.queue);
            let builder = std::thread::Builder::new().name(format!("rigconf-task-{i}"));
            match builder.spawn(move || {
                while let Some(queued) = pop(&queue) {
                    run(queued);
                }
            }) {
                Ok(handle) => {
                    self.workers.push(handle);
                    spawned += 1;
                }
                Err(e) => warn!("failed to spawn task worker: {e}"),
            }
        }
        debug!("task pool started {spawned} of {n} requested workers");
        spawned
    }

    /// Wait for every queued task to complete and every worker to exit.
    ///
    /// Tasks still queued once the workers are gone (queued after they
    /// drained the queue, or never picked up because no worker could be
    /// spawned) run on the calling thread.
    pub fn finish(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("task worker terminated abnormally");
            }
        }
        while let Some(queued) = pop(&self.queue) {
            run(queued);
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.finish();
    }
}
