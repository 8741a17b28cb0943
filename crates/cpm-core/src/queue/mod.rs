//! Hardened queue - FIFO serialization of operations on one resource
//!
//! A queue is a tail promise plus a submission lock. Each submission chains
//! a step onto the current tail and becomes the new tail, so operation *n*
//! cannot start before operation *n-1* has settled, and per-operation
//! promises settle in submission order. The tail itself never rejects: a
//! failed operation only rejects its own promise, and the next step learns
//! about the failure as a value.
//!
//! Submitting never blocks. Operations on different queues are unordered.

mod set;

pub use set::QueueSet;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, trace};

use crate::engine::Engine;
use crate::error::{ErrorKind, Rejection};
use crate::promise::{Outcome, Promise, lock};

/// Default limit on operations waiting in one queue.
pub const DEFAULT_MAX_DEPTH: usize = 1000;
/// Default per-operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Limits applied to every queue built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Submissions are refused with `QueueFull` once this many are pending.
    pub max_depth: usize,
    /// An operation still running after this long rejects with `Timeout`.
    pub op_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Submitted and not yet settled.
    pub pending: usize,
    /// Settled by fulfillment.
    pub completed: u64,
    /// Settled by rejection, including timeouts.
    pub failed: u64,
    /// Configured depth limit.
    pub depth_limit: usize,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Recovery hook: runs instead of the operation when the previous one failed.
type Recovery<T> = Box<dyn FnOnce(Rejection) -> Promise<T> + Send + 'static>;

/// A serializer for operations touching one named resource.
pub struct HardenedQueue {
    resource: String,
    engine: Engine,
    config: QueueConfig,
    /// Fulfills with the failure of the most recent step, if it failed.
    tail: Mutex<Promise<Option<Rejection>>>,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

impl fmt::Debug for HardenedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardenedQueue")
            .field("resource", &self.resource)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl HardenedQueue {
    /// Create an empty queue for `resource`.
    pub fn new(engine: &Engine, resource: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            resource: resource.into(),
            engine: engine.clone(),
            config,
            tail: Mutex::new(engine.resolved(None)),
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// The resource identifier this queue serializes.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Limits this queue was built with.
    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.counters.pending.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            depth_limit: self.config.max_depth,
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `op` once every earlier submission has settled.
    ///
    /// `op` starts the work and returns a promise for it; it runs on the
    /// microtask worker and must not block.
    pub fn submit<T, Op>(&self, op: Op) -> Promise<T>
    where
        T: Clone + Send + 'static,
        Op: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.enqueue(op, None, self.config.op_timeout, true)
    }

    /// Like [`submit`](Self::submit), but if the operation immediately
    /// before this one failed, `recover` runs instead of `op` and receives
    /// that failure.
    pub fn submit_with_recovery<T, Op, Recover>(&self, op: Op, recover: Recover) -> Promise<T>
    where
        T: Clone + Send + 'static,
        Op: FnOnce() -> Promise<T> + Send + 'static,
        Recover: FnOnce(Rejection) -> Promise<T> + Send + 'static,
    {
        self.enqueue(op, Some(Box::new(recover)), self.config.op_timeout, true)
    }

    /// Like [`submit`](Self::submit) with a per-call timeout.
    pub fn submit_with_timeout<T, Op>(&self, op: Op, timeout: Duration) -> Promise<T>
    where
        T: Clone + Send + 'static,
        Op: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.enqueue(op, None, timeout, true)
    }

    /// A barrier that fulfills once everything submitted before it has
    /// settled, or rejects with `Timeout` after `timeout`.
    ///
    /// The barrier is not counted and ignores the depth limit.
    pub fn flush(&self, timeout: Duration) -> Promise<()> {
        let engine = self.engine.clone();
        let barrier = self.enqueue(move || engine.resolved(()), None, Duration::MAX, false);
        self.engine
            .timeout(barrier, timeout, format!("flush of '{}'", self.resource))
    }

    /// Refuse further submissions and return a flush barrier.
    pub fn close(&self, timeout: Duration) -> Promise<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(resource = %self.resource, "closing queue");
        }
        self.flush(timeout)
    }

    fn enqueue<T, Op>(
        &self,
        op: Op,
        recover: Option<Recovery<T>>,
        timeout: Duration,
        counted: bool,
    ) -> Promise<T>
    where
        T: Clone + Send + 'static,
        Op: FnOnce() -> Promise<T> + Send + 'static,
    {
        if counted && self.is_closed() {
            return self.engine.rejected(Rejection::invalid_argument(format!(
                "queue '{}' is closed",
                self.resource
            )));
        }

        let mut tail = lock(&self.tail);

        if counted {
            let pending = self.counters.pending.load(Ordering::SeqCst);
            if pending >= self.config.max_depth {
                debug!(resource = %self.resource, pending, "queue full");
                return self.engine.rejected(Rejection::new(
                    ErrorKind::QueueFull,
                    format!(
                        "queue '{}' has {pending} pending operations (limit {})",
                        self.resource, self.config.max_depth
                    ),
                ));
            }
            self.counters.pending.fetch_add(1, Ordering::SeqCst);
        }

        let deferred = self.engine.deferred::<T>();
        let result = deferred.promise();
        let engine = self.engine.clone();
        let counters = Arc::clone(&self.counters);
        let label = format!("operation on '{}'", self.resource);

        // `react`, not `then`: even a tail broken by a panic in this glue
        // must not stop later steps from running.
        let next = tail.react(move |prior| {
            let prior = match prior {
                Ok(failure) => failure,
                Err(reason) => Some(reason),
            };
            trace!(%label, after_failure = prior.is_some(), "queue step starting");

            let started = match (prior, recover) {
                (Some(reason), Some(recover)) => start_guarded(&engine, move || recover(reason)),
                _ => start_guarded(&engine, op),
            };
            let bounded = engine.timeout(started, timeout, label);

            Outcome::Chain(bounded.settled().map(move |settled| {
                if counted {
                    counters.record(settled.is_ok());
                }
                let failure = settled.as_ref().err().cloned();
                deferred.settle(settled);
                failure
            }))
        });
        *tail = next;

        result
    }
}

/// Call an operation, turning a panic into a rejected promise.
fn start_guarded<T, F>(engine: &Engine, start: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Promise<T>,
{
    panic::catch_unwind(AssertUnwindSafe(start))
        .unwrap_or_else(|_| engine.rejected(Rejection::handler_failed()))
}
