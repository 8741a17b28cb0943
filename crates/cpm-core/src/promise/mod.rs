//! Promise - single-assignment cells with chained reactions
//!
//! A [`Promise`] is a shared handle to a cell that starts pending and settles
//! exactly once, either fulfilled with a value or rejected with a
//! [`Rejection`]. Reactions attached with [`Promise::then`] and friends never
//! run inline: they are queued on the owning [`Engine`]'s microtask FIFO,
//! whether they were attached before or after settlement. That gives every
//! observer the same ordering: registration order, with pre-settlement
//! reactions ahead of later ones.
//!
//! Handlers return an [`Outcome`], the one variant type the engine knows how
//! to adopt. A handler that panics rejects its child with `HandlerFailure`.
//!
//! The reference count of a promise is the number of live handles to its
//! cell. Reactions hold strong handles to the child promises they will
//! settle; nothing points back from a child to its parent, so a chain is
//! freed as soon as its last outside handle and pending reaction are gone.

mod combinators;

pub use combinators::{NodeCallback, all, all_settled, nfcall};

use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::warn;

use crate::engine::Engine;
use crate::error::Rejection;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before
/// calling out, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable state of a promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with a [`Rejection`].
    Rejected,
}

/// What a handler hands back to the engine.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Fulfill the child with this value.
    Value(T),
    /// Reject the child.
    Reject(Rejection),
    /// Settle the child the same way as another promise, once it settles.
    Chain(Promise<T>),
}

impl<T> From<Result<T, Rejection>> for Outcome<T> {
    fn from(result: Result<T, Rejection>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(reason) => Self::Reject(reason),
        }
    }
}

impl<T> From<Promise<T>> for Outcome<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Chain(promise)
    }
}

type Reaction<T> = Box<dyn FnOnce(Result<T, Rejection>) + Send + 'static>;

enum Slot<T> {
    Pending(Vec<Reaction<T>>),
    Fulfilled(T),
    Rejected(Rejection),
}

struct Cell<T> {
    slot: Mutex<Slot<T>>,
}

/// Shared handle to a single-assignment cell.
pub struct Promise<T> {
    cell: Arc<Cell<T>>,
    engine: Engine,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            engine: self.engine.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*lock(&self.cell.slot) {
            Slot::Pending(reactions) => format!("Pending({} reactions)", reactions.len()),
            Slot::Fulfilled(_) => "Fulfilled".to_string(),
            Slot::Rejected(reason) => format!("Rejected({reason})"),
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn pending(engine: &Engine) -> Self {
        Self {
            cell: Arc::new(Cell {
                slot: Mutex::new(Slot::Pending(Vec::new())),
            }),
            engine: engine.clone(),
        }
    }

    /// The engine this promise schedules its reactions on.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Current state. May change from `Pending` by the time it is read.
    pub fn state(&self) -> PromiseState {
        match &*lock(&self.cell.slot) {
            Slot::Pending(_) => PromiseState::Pending,
            Slot::Fulfilled(_) => PromiseState::Fulfilled,
            Slot::Rejected(_) => PromiseState::Rejected,
        }
    }

    /// Shorthand for `state() == PromiseState::Pending`.
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Non-blocking peek at the settled result.
    pub fn value(&self) -> Option<Result<T, Rejection>> {
        match &*lock(&self.cell.slot) {
            Slot::Pending(_) => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Number of live handles to this cell, including those held by
    /// pending reactions.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Returns `true` if both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Settle once. Returns `false` if the promise had already settled.
    pub(crate) fn settle(&self, result: Result<T, Rejection>) -> bool {
        let mut slot = lock(&self.cell.slot);
        let Slot::Pending(reactions) = &mut *slot else {
            return false;
        };
        let reactions = std::mem::take(reactions);
        *slot = match &result {
            Ok(value) => Slot::Fulfilled(value.clone()),
            Err(reason) => Slot::Rejected(reason.clone()),
        };

        // Still under the cell lock: a subscriber racing with settlement
        // must queue behind these.
        for reaction in reactions {
            let result = result.clone();
            self.engine.enqueue(Box::new(move || reaction(result)));
        }
        true
    }

    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub(crate) fn reject(&self, reason: Rejection) -> bool {
        self.settle(Err(reason))
    }

    /// Register a raw reaction. It always runs as a microtask.
    pub(crate) fn subscribe<F>(&self, reaction: F)
    where
        F: FnOnce(Result<T, Rejection>) + Send + 'static,
    {
        let mut slot = lock(&self.cell.slot);
        match &mut *slot {
            Slot::Pending(reactions) => reactions.push(Box::new(reaction)),
            Slot::Fulfilled(value) => {
                let value = value.clone();
                self.engine.enqueue(Box::new(move || reaction(Ok(value))));
            }
            Slot::Rejected(reason) => {
                let reason = reason.clone();
                self.engine.enqueue(Box::new(move || reaction(Err(reason))));
            }
        }
    }

    /// Settle this promise from a handler's outcome.
    pub(crate) fn adopt(&self, outcome: Outcome<T>) {
        match outcome {
            Outcome::Value(value) => {
                self.resolve(value);
            }
            Outcome::Reject(reason) => {
                self.reject(reason);
            }
            Outcome::Chain(source) if source.ptr_eq(self) => {
                self.reject(Rejection::invalid_argument("promise chained to itself"));
            }
            Outcome::Chain(source) => {
                let target = self.clone();
                source.subscribe(move |result| {
                    target.settle(result);
                });
            }
        }
    }

    /// The general reaction: `handler` sees the settled result either way.
    pub fn react<U, F>(&self, handler: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T, Rejection>) -> Outcome<U> + Send + 'static,
    {
        let child = Promise::pending(&self.engine);
        let target = child.clone();
        self.subscribe(move |result| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(result)))
                .unwrap_or_else(|_| {
                    warn!("promise handler panicked");
                    Outcome::Reject(Rejection::handler_failed())
                });
            target.adopt(outcome);
        });
        child
    }

    /// Chain a fulfillment handler. Rejections skip it and propagate unchanged.
    pub fn then<U, F>(&self, on_ok: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        self.react(move |result| match result {
            Ok(value) => on_ok(value),
            Err(reason) => Outcome::Reject(reason),
        })
    }

    /// Chain a rejection handler. Fulfillments skip it and propagate unchanged.
    pub fn catch<F>(&self, on_err: F) -> Promise<T>
    where
        F: FnOnce(Rejection) -> Outcome<T> + Send + 'static,
    {
        self.react(move |result| match result {
            Ok(value) => Outcome::Value(value),
            Err(reason) => on_err(reason),
        })
    }

    /// Chain one handler for each outcome.
    pub fn then_both<U, F, G>(&self, on_ok: F, on_err: G) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
        G: FnOnce(Rejection) -> Outcome<U> + Send + 'static,
    {
        self.react(move |result| match result {
            Ok(value) => on_ok(value),
            Err(reason) => on_err(reason),
        })
    }

    /// Infallible transform of the fulfilled value.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Outcome::Value(f(value)))
    }

    /// A child that settles exactly like this promise.
    pub fn forward(&self) -> Promise<T> {
        self.react(Outcome::from)
    }

    /// A child that always fulfills, carrying this promise's result.
    pub fn settled(&self) -> Promise<Result<T, Rejection>> {
        self.react(Outcome::Value)
    }
}

/// Future returned by `promise.await`.
#[derive(Debug)]
pub struct PromiseFuture<T> {
    receiver: oneshot::Receiver<Result<T, Rejection>>,
}

impl<T> Future for PromiseFuture<T> {
    type Output = Result<T, Rejection>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Rejection::cancelled("promise abandoned before it settled"))
            })
        })
    }
}

impl<T> IntoFuture for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, Rejection>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        let (sender, receiver) = oneshot::channel();
        self.subscribe(move |result| {
            let _ = sender.send(result);
        });
        PromiseFuture { receiver }
    }
}

/// The producer side of a promise.
///
/// Dropping a deferred does not settle its promise.
pub struct Deferred<T> {
    promise: Promise<T>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(engine: &Engine) -> Self {
        Self {
            promise: Promise::pending(engine),
        }
    }

    /// A handle to the owned promise.
    pub fn promise(&self) -> Promise<T> {
        self.promise.clone()
    }

    /// Fulfill. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.promise.resolve(value)
    }

    /// Reject. Returns `false` if already settled.
    pub fn reject(&self, reason: Rejection) -> bool {
        self.promise.reject(reason)
    }

    /// Fulfill or reject from a `Result`. Returns `false` if already settled.
    pub fn settle(&self, result: Result<T, Rejection>) -> bool {
        self.promise.settle(result)
    }
}
