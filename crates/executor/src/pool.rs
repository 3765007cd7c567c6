use crate::JobHandle;
use crate::Priority;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::channel::oneshot;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    priority: Priority,
    sequence: u64,
    run: Job,
}

// `BinaryHeap` pops its greatest element, so "greater" here means "runs
// sooner": the lower priority value, then the earlier submission.
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .value()
            .cmp(&self.priority.value())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueuedJob {}

#[derive(Default)]
struct State {
    queue: BinaryHeap<QueuedJob>,
    next_sequence: u64,
    shutting_down: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

impl Shared {
    // A panicking job never holds this lock, so poisoning can only come from
    // a bug in the queue bookkeeping itself; the state is still consistent.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed pool of worker threads draining one priority queue.
///
/// Jobs of a lower [`Priority`] value run first; jobs of equal priority run
/// in submission order. There is one executor per process, shared as
/// `Arc<Executor>`.
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl Executor {
    /// Start `workers` threads (at least one).
    ///
    /// # Errors
    ///
    /// [`Spawn`](ErrorKind::Spawn) if the OS refuses to start a thread. Any
    /// threads already started are shut down again.
    pub fn new(workers: usize) -> Result<Self> {
        let size = workers.max(1);
        let executor = Self {
            shared: Arc::new(Shared::default()),
            workers: Mutex::new(Vec::with_capacity(size)),
            size,
        };
        for index in 0..size {
            let shared = Arc::clone(&executor.shared);
            let join = thread::Builder::new()
                .name(format!("tierstore-worker-{index}"))
                .spawn(move || worker_loop(&shared, index))
                .or_raise(|| ErrorKind::Spawn)?;
            executor.join_handles().push(join);
        }
        debug!(workers = size, "executor started");
        Ok(executor)
    }

    fn join_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs waiting in the queue (not counting running ones).
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Enqueue a job. Never blocks on the job itself.
    ///
    /// A job that panics resolves its handle to
    /// [`Panicked`](ErrorKind::Panicked); a job submitted after
    /// [`shutdown()`](Self::shutdown) resolves to
    /// [`ShutDown`](ErrorKind::ShutDown) without running.
    pub fn submit<T, F>(&self, priority: Priority, job: F) -> JobHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut state = self.shared.lock();
        if state.shutting_down {
            drop(state);
            // The receiver is alive: it's returned below.
            let _ = tx.send(Err(exn::Exn::from(ErrorKind::ShutDown)));
            return JobHandle::new(rx);
        }
        let run: Job = Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(value) => Ok(value),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(%message, "job panicked");
                    Err(exn::Exn::from(ErrorKind::Panicked(message)))
                },
            };
            // Nobody listening is fine: the handle was dropped.
            let _ = tx.send(outcome);
        });
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.queue.push(QueuedJob { priority, sequence, run });
        drop(state);
        self.shared.available.notify_one();
        trace!(%priority, sequence, "job queued");
        JobHandle::new(rx)
    }

    /// Stop accepting jobs, let the workers drain the queue, and join them.
    ///
    /// Idempotent. Safe to call from inside a job: the calling worker is not
    /// joined.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if !state.shutting_down {
                debug!(pending = state.queue.len(), "executor shutting down");
            }
            state.shutting_down = true;
        }
        self.shared.available.notify_all();
        let handles: Vec<_> = self.join_handles().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread terminated abnormally");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("size", &self.size).field("pending", &self.pending()).finish()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.queue.pop() {
                    break job;
                }
                if state.shutting_down {
                    trace!(worker = index, "worker exiting");
                    return;
                }
                state = shared.available.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
        };
        trace!(worker = index, priority = %job.priority, sequence = job.sequence, "running job");
        (job.run)();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
