//! Combinators over groups of promises, and the callback adapter.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::{Deferred, Promise, lock};
use crate::engine::Engine;
use crate::error::Rejection;

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    fn new(len: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(len).collect(),
            remaining: len,
        }
    }

    /// Store one result; returns every result once the last one arrives.
    fn fill(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.slots[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        (self.remaining == 0).then(|| self.slots.drain(..).flatten().collect())
    }
}

/// Fulfill with every value, in input order, once all inputs fulfill.
///
/// Rejects with the first rejection observed; later settlements are
/// ignored. An empty input fulfills with an empty vector on the next
/// microtask.
pub fn all<T, I>(engine: &Engine, promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    let deferred: Deferred<Vec<T>> = engine.deferred();
    let combined = deferred.promise();

    if promises.is_empty() {
        engine.enqueue(Box::new(move || {
            deferred.resolve(Vec::new());
        }));
        return combined;
    }

    let gather = Arc::new(Mutex::new(Gather::new(promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let deferred = deferred.clone();
        promise.subscribe(move |result| match result {
            Ok(value) => {
                let complete = lock(&gather).fill(index, value);
                if let Some(values) = complete {
                    deferred.resolve(values);
                }
            }
            Err(reason) => {
                deferred.reject(reason);
            }
        });
    }
    combined
}

/// Fulfill, after every input settles, with each input's result in order.
///
/// Never rejects.
pub fn all_settled<T, I>(engine: &Engine, promises: I) -> Promise<Vec<Result<T, Rejection>>>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    all(engine, promises.into_iter().map(|p| p.settled()))
}

/// The callback handed to the function wrapped by [`nfcall`].
///
/// Only the first call has any effect.
pub struct NodeCallback<T> {
    deferred: Deferred<T>,
}

impl<T> Clone for NodeCallback<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T> fmt::Debug for NodeCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCallback").finish_non_exhaustive()
    }
}

impl<T> NodeCallback<T>
where
    T: Clone + Send + 'static,
{
    /// Report completion. An error rejects; otherwise the value fulfills.
    ///
    /// Returns `false` if an earlier call already settled the promise.
    pub fn call(&self, err: Option<Rejection>, value: Option<T>) -> bool {
        match (err, value) {
            (Some(reason), _) => self.deferred.reject(reason),
            (None, Some(value)) => self.deferred.resolve(value),
            (None, None) => self.deferred.reject(Rejection::invalid_argument(
                "callback invoked with neither an error nor a value",
            )),
        }
    }

    /// Fulfill with `value`.
    pub fn ok(&self, value: T) -> bool {
        self.call(None, Some(value))
    }

    /// Reject with `reason`.
    pub fn fail(&self, reason: Rejection) -> bool {
        self.call(Some(reason), None)
    }
}

/// Adapt a callback-style function into a promise.
///
/// `start` runs immediately on the calling thread and receives the callback;
/// it may invoke it synchronously or hand it to another thread. A panic in
/// `start` rejects with `HandlerFailure` unless the callback already fired.
pub fn nfcall<T, F>(engine: &Engine, start: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(NodeCallback<T>),
{
    let deferred = engine.deferred();
    let promise = deferred.promise();
    let callback = NodeCallback {
        deferred: deferred.clone(),
    };

    if panic::catch_unwind(AssertUnwindSafe(|| start(callback))).is_err() {
        deferred.reject(Rejection::handler_failed());
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::promise::Outcome;
    use std::time::Duration;

    fn boom(msg: &str) -> Rejection {
        Rejection::new(ErrorKind::HandlerFailure, msg)
    }

    #[tokio::test]
    async fn test_all_preserves_input_order() {
        let engine = Engine::start().unwrap();
        let slow = engine.delay(Duration::from_millis(20)).map(|()| 1);
        let fast = engine.resolved(2);
        let mid = engine.delay(Duration::from_millis(5)).map(|()| 3);
        assert_eq!(all(&engine, [slow, fast, mid]).await, Ok(vec![1, 2, 3]));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_all_rejects_with_first_rejection() {
        let engine = Engine::start().unwrap();
        let inputs = vec![
            engine.resolved(1),
            engine.rejected(boom("x")),
            engine.resolved(3),
        ];
        assert_eq!(all(&engine, inputs).await, Err(boom("x")));

        let late = engine
            .delay(Duration::from_millis(20))
            .then(|()| Outcome::<i32>::Reject(boom("late")));
        let early = engine.rejected(boom("early"));
        assert_eq!(all(&engine, [late, early]).await, Err(boom("early")));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_all_empty_fulfills_on_next_microtask() {
        let engine = Engine::start().unwrap();
        let (release, parked) = std::sync::mpsc::channel::<()>();
        engine.enqueue(Box::new(move || {
            let _ = parked.recv();
        }));

        let empty = all::<u8, _>(&engine, Vec::new());
        assert!(empty.is_pending());
        release.send(()).unwrap();
        assert_eq!(empty.await, Ok(Vec::new()));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_all_settled_reports_each_outcome() {
        let engine = Engine::start().unwrap();
        let inputs = vec![engine.resolved("a"), engine.rejected(boom("b"))];
        let results = all_settled(&engine, inputs).await.unwrap();
        assert_eq!(results, vec![Ok("a"), Err(boom("b"))]);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_nfcall_first_call_wins() {
        let engine = Engine::start().unwrap();
        let p = nfcall(&engine, |cb: NodeCallback<u32>| {
            assert!(cb.ok(7));
            assert!(!cb.fail(boom("too late")));
        });
        assert_eq!(p.await, Ok(7));

        let p = nfcall(&engine, |cb: NodeCallback<u32>| {
            cb.call(Some(boom("io")), Some(1));
        });
        assert_eq!(p.await, Err(boom("io")));
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_nfcall_from_another_thread() {
        let engine = Engine::start().unwrap();
        let p = nfcall(&engine, |cb: NodeCallback<String>| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                cb.ok("done".to_string());
            });
        });
        assert_eq!(p.await.unwrap(), "done");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_nfcall_missing_value_and_panic() {
        let engine = Engine::start().unwrap();
        let empty = nfcall(&engine, |cb: NodeCallback<u8>| {
            cb.call(None, None);
        });
        assert_eq!(empty.await.unwrap_err().kind, ErrorKind::InvalidArgument);

        let panicked = nfcall(&engine, |_cb: NodeCallback<u8>| panic!("bad start"));
        assert_eq!(panicked.await, Err(Rejection::handler_failed()));
        engine.shutdown();
    }
}
