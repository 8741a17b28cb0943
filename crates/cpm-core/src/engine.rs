//! Engine - the runtime context every promise belongs to
//!
//! The engine owns the microtask FIFO. A single dedicated thread drains it,
//! so handlers run one at a time in enqueue order and a task queued from
//! inside another task always runs after it. Blocking work, async I/O and
//! timers are delegated to the tokio runtime the engine was started on.
//!
//! There is no global state: every engine is an independent value, and
//! tests routinely run several side by side.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::error::Rejection;
use crate::promise::{Deferred, Promise, lock};

/// A unit of work on the microtask FIFO.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Events consumed by the microtask worker
enum Event {
    /// Run a task to completion
    Run(Task),
    /// Stop after the tasks already queued
    Shutdown,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(_) => write!(f, "Run"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

struct EngineShared {
    sender: mpsc::Sender<Event>,
    worker_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

/// Handle to a running engine. Cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("worker", &self.shared.worker_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start an engine bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when called outside a runtime, `IoFailure` if the
    /// worker thread cannot be spawned.
    pub fn start() -> Result<Self, Rejection> {
        let runtime = Handle::try_current().map_err(|_| {
            Rejection::invalid_argument("Engine::start must be called from within a tokio runtime")
        })?;
        Self::with_handle(runtime)
    }

    /// Start an engine that delegates async and blocking work to `runtime`.
    pub fn with_handle(runtime: Handle) -> Result<Self, Rejection> {
        let (sender, receiver) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("cpm-microtask".into())
            .spawn(move || run_microtask_loop(receiver))?;

        Ok(Self {
            shared: Arc::new(EngineShared {
                sender,
                worker_id: worker.thread().id(),
                worker: Mutex::new(Some(worker)),
                runtime,
            }),
        })
    }

    /// Stop the worker after it drains the tasks already queued.
    ///
    /// Tasks enqueued afterwards are dropped; promises waiting on them never
    /// settle, and `.await`ing such a promise yields `Cancelled`.
    pub fn shutdown(self) {
        let _ = self.shared.sender.send(Event::Shutdown);
        let worker = lock(&self.shared.worker).take();
        if let Some(worker) = worker {
            if self.is_worker_thread() {
                return;
            }
            if worker.join().is_err() {
                warn!("microtask worker exited abnormally");
            }
        }
    }

    /// Returns `true` when called from this engine's microtask worker.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.shared.worker_id
    }

    /// Append a task to the microtask FIFO.
    pub(crate) fn enqueue(&self, task: Task) {
        if self.shared.sender.send(Event::Run(task)).is_err() {
            warn!("microtask dropped: engine has shut down");
        }
    }

    /// The tokio runtime this engine delegates to.
    pub fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    /// A new deferred whose promise belongs to this engine.
    pub fn deferred<T>(&self) -> Deferred<T>
    where
        T: Clone + Send + 'static,
    {
        Deferred::new(self)
    }

    /// An already fulfilled promise.
    pub fn resolved<T>(&self, value: T) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        let deferred = self.deferred();
        deferred.resolve(value);
        deferred.promise()
    }

    /// An already rejected promise.
    pub fn rejected<T>(&self, reason: Rejection) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        let deferred = self.deferred();
        deferred.reject(reason);
        deferred.promise()
    }

    /// Run a future on the runtime and settle a promise with its output.
    pub fn spawn<T, F>(&self, future: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T, Rejection>> + Send + 'static,
    {
        let deferred = self.deferred();
        let promise = deferred.promise();
        self.shared.runtime.spawn(async move {
            deferred.settle(future.await);
        });
        promise
    }

    /// Run a blocking closure on the runtime's blocking pool.
    ///
    /// A panic inside `work` rejects the promise with `HandlerFailure`.
    pub fn spawn_blocking<T, F>(&self, work: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, Rejection> + Send + 'static,
    {
        let deferred = self.deferred();
        let promise = deferred.promise();
        self.shared.runtime.spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|_| Err(Rejection::handler_failed()));
            deferred.settle(result);
        });
        promise
    }

    /// A promise that fulfills after `duration`.
    pub fn delay(&self, duration: Duration) -> Promise<()> {
        self.spawn(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }

    /// Mirror `promise`, or reject with `Timeout` if it has not settled
    /// within `limit`. The original promise is unaffected.
    pub fn timeout<T>(&self, promise: Promise<T>, limit: Duration, what: impl Into<String>) -> Promise<T>
    where
        T: Clone + Send + 'static,
    {
        let what = what.into();
        self.spawn(async move {
            match tokio::time::timeout(limit, promise).await {
                Ok(result) => result,
                Err(_) => Err(Rejection::timeout(format!("{what} exceeded {limit:?}"))),
            }
        })
    }

    /// Block the calling thread until `promise` settles.
    ///
    /// Only legal at the outermost boundary of a program, from a thread that
    /// is neither the microtask worker nor a runtime thread the promise
    /// depends on.
    ///
    /// # Errors
    ///
    /// The promise's rejection; `InvalidArgument` when called on the
    /// microtask worker; `Cancelled` if the engine stops first.
    pub fn block_on<T>(&self, promise: &Promise<T>) -> Result<T, Rejection>
    where
        T: Clone + Send + 'static,
    {
        if self.is_worker_thread() {
            return Err(Rejection::invalid_argument(
                "block_on called from the microtask worker",
            ));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        promise.subscribe(move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .map_err(|_| Rejection::cancelled("engine stopped before the promise settled"))?
    }
}

fn run_microtask_loop(receiver: mpsc::Receiver<Event>) {
    trace!("microtask worker started");
    while let Ok(event) = receiver.recv() {
        match event {
            Event::Run(task) => {
                // Handlers are already guarded; this keeps the worker alive
                // if engine-internal glue panics.
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!("microtask panicked");
                }
            }
            Event::Shutdown => break,
        }
    }
    trace!("microtask worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Outcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_start_requires_runtime_and_shuts_down() {
        let engine = Engine::start().unwrap();
        assert!(!engine.is_worker_thread());
        engine.shutdown();
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let err = Engine::start().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_microtasks_run_in_enqueue_order() {
        let engine = Engine::start().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();

        for i in 0..5 {
            let log = Arc::clone(&log);
            engine.enqueue(Box::new(move || log.lock().unwrap().push(i)));
        }
        engine.enqueue(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_nested_task_runs_after_current() {
        let engine = Engine::start().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let inner_engine = engine.clone();
        let outer_log = Arc::clone(&log);
        engine.enqueue(Box::new(move || {
            let nested_log = Arc::clone(&outer_log);
            inner_engine.enqueue(Box::new(move || {
                nested_log.lock().unwrap().push("nested");
                let _ = tx.send(());
            }));
            outer_log.lock().unwrap().push("outer");
        }));
        rx.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "nested"]);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_handlers_run_on_worker_thread() {
        let engine = Engine::start().unwrap();
        let handle = engine.clone();
        let on_worker = engine.resolved(()).map(move |()| handle.is_worker_thread());
        assert!(on_worker.await.unwrap());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_spawn_blocking_panic_rejects() {
        let engine = Engine::start().unwrap();
        let p: Promise<u32> = engine.spawn_blocking(|| panic!("disk on fire"));
        let err = p.await.unwrap_err();
        assert_eq!(err, Rejection::handler_failed());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_timeout_rejects_slow_promise() {
        let engine = Engine::start().unwrap();
        let slow = engine.delay(Duration::from_millis(200));
        let bounded = engine.timeout(slow, Duration::from_millis(10), "slow op");
        let err = bounded.await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Timeout);

        let fast = engine.resolved(7);
        assert_eq!(
            engine.timeout(fast, Duration::from_secs(1), "fast").await,
            Ok(7)
        );
        engine.shutdown();
    }

    #[test]
    fn test_block_on_from_outside_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let engine = Engine::with_handle(rt.handle().clone()).unwrap();

        let p = engine
            .delay(Duration::from_millis(5))
            .then(|()| Outcome::Value(42));
        assert_eq!(engine.block_on(&p), Ok(42));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_block_on_refuses_worker_thread() {
        let engine = Engine::start().unwrap();
        let handle = engine.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);

        let result = engine.resolved(()).map(move |()| {
            seen_in_handler.fetch_add(1, Ordering::SeqCst);
            let inner = handle.resolved(1);
            handle.block_on(&inner).map_err(|r| r.kind)
        });

        assert_eq!(
            result.await.unwrap(),
            Err(crate::ErrorKind::InvalidArgument)
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_engines_are_independent() {
        let a = Engine::start().unwrap();
        let b = Engine::start().unwrap();
        let pa = a.resolved(1);
        let pb = b.resolved(2);
        a.shutdown();
        assert_eq!(pb.await, Ok(2));
        drop(pa);
        b.shutdown();
    }
}
