use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use fixpoint_common::FixpointError;
use parking_lot::{Condvar, Mutex};

/// Worker pool shared by one store.
///
/// Every unit of work — eager computations, triggered computations,
/// continuations — passes through [`TaskPool::spawn`], which keeps an
/// in-flight count. Quiescence is exactly `in_flight == 0`: a running unit
/// increments the count for everything it spawns before finishing itself,
/// so the count cannot dip to zero while work is still being produced.
pub(crate) struct TaskPool {
    pool: rayon::ThreadPool,
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
    cancelled: AtomicBool,
    failure: Mutex<Option<FixpointError>>,
    executed: AtomicU64,
}

impl TaskPool {
    pub fn new(worker_threads: Option<usize>) -> Self {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("fixpoint-worker-{i}"));
        if let Some(threads) = worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().expect("failed to build the worker pool");
        Self {
            pool,
            in_flight: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            cancelled: AtomicBool::new(false),
            failure: Mutex::new(None),
            executed: AtomicU64::new(0),
        }
    }

    /// Submit one unit. Units spawned after cancellation (and units still
    /// queued when it is raised) are drained without executing.
    pub fn spawn(this: &Arc<Self>, task: impl FnOnce() + Send + 'static) {
        this.in_flight.fetch_add(1, Ordering::SeqCst);
        let me = Arc::clone(this);
        this.pool.spawn(move || {
            if !me.cancelled.load(Ordering::SeqCst) {
                me.executed.fetch_add(1, Ordering::Relaxed);
                task();
            }
            me.finish_one();
        });
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }

    /// Block until all in-flight units have drained. Returns `false` when
    /// the deadline expired first.
    pub fn await_quiescence(&self, deadline: Option<Instant>) -> bool {
        let mut guard = self.idle_lock.lock();
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            match deadline {
                Some(at) => {
                    if Instant::now() >= at {
                        return false;
                    }
                    if self.idle.wait_until(&mut guard, at).timed_out()
                        && self.in_flight.load(Ordering::SeqCst) != 0
                    {
                        return false;
                    }
                }
                None => self.idle.wait(&mut guard),
            }
        }
        true
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record an analysis panic and raise cancellation; the first failure
    /// wins, later ones are logged and dropped.
    pub fn fail(&self, context: &str, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload);
        tracing::error!(
            target: "fixpoint::store",
            context,
            %message,
            "analysis computation panicked"
        );
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(FixpointError::AnalysisPanicked {
                    context: context.to_string(),
                    message,
                });
            }
        }
        self.cancel();
    }

    pub fn failure(&self) -> Option<FixpointError> {
        self.failure.lock().clone()
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Fresh flags and counters for the next phase.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        *self.failure.lock() = None;
        self.executed.store(0, Ordering::Relaxed);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
