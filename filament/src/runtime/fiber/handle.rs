use crate::runtime::context;
use super::core::FiberRef;

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

/// Where a fiber's result waits for its [`FiberHandle`].
pub(crate) struct JoinState<T> {
    slot: Mutex<JoinSlot<T>>,
    finished: Condvar,
}

struct JoinSlot<T> {
    result: Option<thread::Result<T>>,
    done: bool,
    waker: Option<Waker>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(JoinSlot {
                result: None,
                done: false,
                waker: None,
            }),
            finished: Condvar::new(),
        })
    }

    fn complete(&self, result: thread::Result<T>) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.done {
                return;
            }
            slot.result = Some(result);
            slot.done = true;
            slot.waker.take()
        };

        self.finished.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.slot.lock().done
    }

    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<thread::Result<T>> {
        let mut slot = self.slot.lock();

        if slot.done {
            return match slot.result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("fiber result polled after it was taken"),
            };
        }

        match &slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }

    /// Blocks the calling OS thread until the fiber finishes.
    pub(crate) fn wait_blocking(&self) -> thread::Result<T> {
        let mut slot = self.slot.lock();
        while !slot.done {
            self.finished.wait(&mut slot);
        }

        slot.result
            .take()
            .unwrap_or_else(|| Err(Box::new("fiber result already taken")))
    }
}

/// Completes the join state even when the fiber body is dropped unfinished.
pub(crate) struct Completion<T> {
    state: Option<Arc<JoinState<T>>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(state: Arc<JoinState<T>>) -> Self {
        Self { state: Some(state) }
    }

    pub(crate) fn finish(mut self, result: thread::Result<T>) {
        if let Some(state) = self.state.take() {
            state.complete(result);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.complete(Err(Box::new("fiber was dropped before it completed")));
        }
    }
}

/// Polls the inner future, turning a panic into an `Err` output.
pub(crate) struct CatchUnwind<F> {
    future: Pin<Box<F>>,
}

impl<F> CatchUnwind<F> {
    pub(crate) fn new(future: F) -> Self {
        Self {
            future: Box::pin(future),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = thread::Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.future.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(move || future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// An owned permission to await a fiber's result.
///
/// Awaiting the handle yields the fiber's output. If the fiber panicked,
/// the panic is resumed in the awaiting fiber. Dropping the handle detaches
/// the fiber; it keeps running.
pub struct FiberHandle<T> {
    fiber: FiberRef,
    join: Arc<JoinState<T>>,
}

impl<T> FiberHandle<T> {
    pub(crate) fn new(fiber: FiberRef, join: Arc<JoinState<T>>) -> Self {
        Self { fiber, join }
    }

    /// The fiber behind this handle.
    pub fn fiber(&self) -> &FiberRef {
        &self.fiber
    }

    pub fn id(&self) -> u64 {
        self.fiber.id()
    }

    /// Whether the fiber has produced its result (or panicked).
    pub fn is_finished(&self) -> bool {
        self.join.is_done()
    }

    /// Blocks the calling thread until the fiber finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from a scheduler thread, and resumes the
    /// fiber's panic if it had one.
    pub fn wait_blocking(self) -> T {
        assert!(
            context::scheduler().is_none(),
            "wait_blocking called from a scheduler thread"
        );

        match self.join.wait_blocking() {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<T> Future for FiberHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match self.join.poll_result(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(payload)) => panic::resume_unwind(payload),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Unpin for FiberHandle<T> {}
