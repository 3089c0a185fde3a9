use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};

use crate::any::Any;
use crate::executor::ExecutorRef;

type ValueCont = Box<dyn FnOnce(Any) + Send>;
type BorrowCont = Box<dyn FnOnce(BorrowGuard) + Send>;

enum State {
    // At most one continuation: a future is a single-consumer handle.
    Pending(Option<ValueCont>),
    Ready(Any),
    // The value was taken, or the promise was dropped unresolved.
    Done,
    Cancelled,
}

struct Shared {
    state: Mutex<State>,
    ready: Condvar,
    ex: ExecutorRef,
}

/// Write end of a single-producer single-consumer handoff. Resolving is a
/// one-shot operation; dropping an unresolved promise cancels the paired
/// future and everything registered downstream of it.
pub struct Promise {
    shared: Arc<Shared>,
    sent: bool,
}

/// Read end of the handoff: the sole path to the value. Continuations are
/// published to the executor in registration order; `wait` blocks the
/// calling (non-worker) thread.
pub struct Future {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Future {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").finish_non_exhaustive()
    }
}

pub fn make_promise_future(ex: &ExecutorRef) -> (Promise, Future) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
        ready: Condvar::new(),
        ex: ex.clone(),
    });
    (
        Promise {
            shared: Arc::clone(&shared),
            sent: false,
        },
        Future { shared },
    )
}

impl Promise {
    pub fn send(mut self, value: Any) {
        self.sent = true;
        let cont = {
            let mut state = self.shared.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Done) {
                State::Pending(Some(cont)) => Some((cont, value)),
                State::Pending(None) => {
                    *state = State::Ready(value);
                    self.shared.ready.notify_all();
                    None
                }
                _ => unreachable!("promise resolved twice"),
            }
        };
        if let Some((cont, value)) = cont {
            self.shared.ex.enqueue(move || cont(value));
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        // Dropping the pending continuation cascades the cancellation to
        // any promise it captured.
        *state = State::Cancelled;
        self.shared.ready.notify_all();
    }
}

impl Future {
    pub fn ready(ex: &ExecutorRef, value: Any) -> Self {
        let (promise, future) = make_promise_future(ex);
        promise.send(value);
        future
    }

    pub fn executor(&self) -> &ExecutorRef {
        &self.shared.ex
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state.lock().unwrap(), State::Ready(_))
    }

    /// Registers the continuation to run on the executor once the value
    /// arrives, consuming this handle.
    pub fn on_ready(self, cont: impl FnOnce(Any) + Send + 'static) {
        let mut cont = Some(cont);
        let value = {
            let mut state = self.shared.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Done) {
                State::Pending(None) => {
                    *state = State::Pending(Some(Box::new(cont.take().unwrap())));
                    None
                }
                State::Ready(value) => Some(value),
                State::Cancelled => {
                    *state = State::Cancelled;
                    None
                }
                State::Pending(Some(_)) | State::Done => {
                    unreachable!("future consumed twice")
                }
            }
        };
        if let Some(value) = value {
            let ex = self.shared.ex.clone();
            let cont = cont.take().unwrap();
            ex.enqueue(move || cont(value));
        }
    }

    pub fn then(self, f: impl FnOnce(Any) -> Any + Send + 'static) -> Future {
        let (promise, future) = make_promise_future(&self.shared.ex);
        self.on_ready(move |value| promise.send(f(value)));
        future
    }

    /// Resolves `promise` with this future's value once it arrives.
    pub fn forward(self, promise: Promise) {
        self.on_ready(move |value| promise.send(value));
    }

    /// Blocks the calling thread until the value arrives.
    pub fn wait(self) -> Any {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            match std::mem::replace(&mut *state, State::Done) {
                State::Ready(value) => return value,
                State::Cancelled => panic!("waited on a cancelled future"),
                s @ State::Pending(None) => {
                    *state = s;
                    state = self.shared.ready.wait(state).unwrap();
                }
                State::Pending(Some(_)) | State::Done => {
                    unreachable!("future consumed twice")
                }
            }
        }
    }
}

struct BorrowState {
    // Live share handles, plus one count per waiting continuation, plus one
    // count held by the producer until the source value has been delivered.
    refs: usize,
    value: Option<Arc<Any>>,
    waiting: Vec<BorrowCont>,
    post: Option<Promise>,
}

struct BorrowInner {
    state: Mutex<BorrowState>,
    ex: ExecutorRef,
}

/// A shared read-only view of a future's value. Shares may be cloned and
/// fan out; once every share (and every in-flight borrow continuation) has
/// dropped, the post-borrow future resumes with the original value.
pub struct BorrowedFuture {
    inner: Arc<BorrowInner>,
}

impl std::fmt::Debug for BorrowedFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedFuture").finish_non_exhaustive()
    }
}

/// Keeps a borrow share alive while a continuation reads the value.
pub struct BorrowGuard {
    value: Arc<Any>,
    _share: BorrowedFuture,
}

impl Deref for BorrowGuard {
    type Target = Any;

    fn deref(&self) -> &Any {
        &self.value
    }
}

/// Splits a future into a borrowed view and the post-borrow future that
/// resumes once every share has been dropped.
pub fn borrow(future: Future) -> (BorrowedFuture, Future) {
    let ex = future.executor().clone();
    let (post_promise, post_future) = make_promise_future(&ex);
    let inner = Arc::new(BorrowInner {
        state: Mutex::new(BorrowState {
            refs: 2,
            value: None,
            waiting: Vec::new(),
            post: Some(post_promise),
        }),
        ex,
    });

    let producer = BorrowedFuture {
        inner: Arc::clone(&inner),
    };
    future.on_ready(move |value| {
        producer.fill(value);
    });

    (BorrowedFuture { inner }, post_future)
}

impl BorrowedFuture {
    fn fill(&self, value: Any) {
        let mut state = self.inner.state.lock().unwrap();
        debug_assert!(state.value.is_none());
        if state.refs == 1 {
            // Every share was dropped before the value arrived; resume the
            // post-borrow future directly.
            let post = state.post.take();
            drop(state);
            if let Some(post) = post {
                post.send(value);
            }
            return;
        }

        let value = Arc::new(value);
        state.value = Some(Arc::clone(&value));
        // Each waiting continuation already holds a count; it transfers to
        // the guard handed to the continuation.
        let waiting = std::mem::take(&mut state.waiting);
        drop(state);

        for cont in waiting {
            let guard = BorrowGuard {
                value: Arc::clone(&value),
                _share: BorrowedFuture {
                    inner: Arc::clone(&self.inner),
                },
            };
            self.inner.ex.enqueue(move || cont(guard));
        }
    }

    /// Runs `cont` with read access to the value once it is available. The
    /// borrow stays live for the duration of the continuation.
    pub fn on_ready(&self, cont: impl FnOnce(BorrowGuard) + Send + 'static) {
        let mut state = self.inner.state.lock().unwrap();
        state.refs += 1;
        if let Some(value) = state.value.clone() {
            let guard = BorrowGuard {
                value,
                _share: BorrowedFuture {
                    inner: Arc::clone(&self.inner),
                },
            };
            drop(state);
            self.inner.ex.enqueue(move || cont(guard));
        } else {
            state.waiting.push(Box::new(cont));
        }
    }

    /// Produces a future of `f`'s result, computed with read access to the
    /// borrowed value.
    pub fn then(&self, f: impl FnOnce(&Any) -> Any + Send + 'static) -> Future {
        let (promise, future) = make_promise_future(&self.inner.ex);
        self.on_ready(move |guard| promise.send(f(&guard)));
        future
    }
}

impl Clone for BorrowedFuture {
    fn clone(&self) -> Self {
        self.inner.state.lock().unwrap().refs += 1;
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for BorrowedFuture {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap();
        state.refs -= 1;
        if state.refs > 0 {
            return;
        }
        let value = state.value.take();
        let post = state.post.take();
        drop(state);

        let Some(post) = post else {
            return;
        };
        match value {
            Some(value) => {
                let value = Arc::try_unwrap(value)
                    .unwrap_or_else(|_| panic!("outstanding reference at last borrow release"));
                post.send(value);
            }
            // Value never arrived: dropping the promise cascades the
            // cancellation to the post-borrow future.
            None => drop(post),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{make_seq_executor, make_task_executor};

    fn get<T: Clone + Send + Sync + 'static>(future: Future) -> T {
        future.wait().downcast::<T>().ok().unwrap()
    }

    #[test]
    fn send_then_wait() {
        let ex = make_seq_executor();
        let (promise, future) = make_promise_future(&ex);
        promise.send(Any::cloneable(5i32));
        assert_eq!(5, get::<i32>(future));
    }

    #[test]
    fn then_chains_on_executor() {
        let ex = make_seq_executor();
        let (promise, future) = make_promise_future(&ex);
        let future = future.then(|any| {
            let x = any.downcast::<i32>().ok().unwrap();
            Any::cloneable(x + 1)
        });
        promise.send(Any::cloneable(1i32));
        assert_eq!(2, get::<i32>(future));
    }

    #[test]
    fn continuation_registered_after_resolution() {
        let ex = make_seq_executor();
        let future = Future::ready(&ex, Any::cloneable(3i32));
        assert!(future.is_ready());
        assert_eq!(4, get::<i32>(future.then(|any| {
            Any::cloneable(any.downcast::<i32>().ok().unwrap() + 1)
        })));
    }

    #[test]
    fn borrow_fans_out_and_resumes() {
        let ex = make_seq_executor();
        let (promise, future) = make_promise_future(&ex);
        let (borrowed, post) = borrow(future);

        let f1 = borrowed.then(|any| Any::cloneable(*any.downcast_ref::<i32>().unwrap() + 1));
        let f2 = borrowed.then(|any| Any::cloneable(*any.downcast_ref::<i32>().unwrap() + 2));
        drop(borrowed);

        promise.send(Any::cloneable(10i32));
        assert_eq!(11, get::<i32>(f1));
        assert_eq!(12, get::<i32>(f2));
        assert_eq!(10, get::<i32>(post));
    }

    #[test]
    fn post_future_resumes_without_continuations() {
        let ex = make_seq_executor();
        let (borrowed, post) = borrow(Future::ready(&ex, Any::cloneable(7i32)));
        drop(borrowed);
        assert_eq!(7, get::<i32>(post));
    }

    #[test]
    fn borrow_share_cloned_across_threads() {
        let ex = make_task_executor(4);
        let (promise, future) = make_promise_future(&ex);
        let (borrowed, post) = borrow(future);

        let futures: Vec<Future> = (0..16)
            .map(|i| {
                borrowed.then(move |any| {
                    Any::cloneable(*any.downcast_ref::<i32>().unwrap() + i)
                })
            })
            .collect();
        drop(borrowed);

        promise.send(Any::cloneable(100i32));
        for (i, future) in futures.into_iter().enumerate() {
            assert_eq!(100 + i as i32, get::<i32>(future));
        }
        assert_eq!(100, get::<i32>(post));
    }

    #[test]
    fn dropping_future_discards_value() {
        let ex = make_seq_executor();
        let (promise, future) = make_promise_future(&ex);
        drop(future);
        promise.send(Any::cloneable(1i32));
    }
}
