use super::cancel::{CancelationToken, CancelationWord, TimeoutOutcome};
use super::state::{COMPLETED, IDLE, NOTIFIED, QUEUED, RUNNING};
use super::waker::fiber_waker;
use crate::runtime::context;
use crate::runtime::executor::core::{ContextId, ContextInner, ExecutionContext};

use log::trace;
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// Shared reference to a fiber.
pub type FiberRef = Arc<Fiber>;

pub(crate) type Continuation = Pin<Box<dyn Future<Output = ()> + Send>>;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_fiber_id() -> u64 {
    NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A cooperatively scheduled unit of work.
///
/// A fiber is a suspended continuation plus the bookkeeping a scheduler
/// needs: its scheduling state, the execution context it belongs to and
/// the cancelation word used by [`arm_timeout`](crate::time::arm_timeout).
/// Parking is returning `Poll::Pending`; resuming is waking it, which puts
/// it back on a run queue of its own context.
pub struct Fiber {
    id: u64,
    name: Option<String>,
    state: AtomicUsize,
    /// Only touched by the scheduler that moved `state` to `RUNNING`.
    continuation: UnsafeCell<Option<Continuation>>,
    context_id: ContextId,
    context: Weak<ContextInner>,
    cancelation: CancelationWord,
}

unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    pub(crate) fn new(
        id: u64,
        name: Option<String>,
        context: &Arc<ContextInner>,
        continuation: Continuation,
    ) -> Self {
        Self {
            id,
            name,
            state: AtomicUsize::new(QUEUED),
            continuation: UnsafeCell::new(Some(continuation)),
            context_id: context.id(),
            context: Arc::downgrade(context),
            cancelation: CancelationWord::new(),
        }
    }

    /// Process-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the continuation has run to completion.
    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }

    /// The execution context this fiber runs on, if it still exists.
    pub fn context(&self) -> Option<ExecutionContext> {
        self.context.upgrade().map(ExecutionContext::from_inner)
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub(crate) fn cancelation(&self) -> &CancelationWord {
        &self.cancelation
    }

    /// Claims the resumption tied to `token` on behalf of an explicit event.
    ///
    /// Returns `true` if this call won against the timer (and every other
    /// resolver); the caller must then [`resume`](Self::resume) the fiber.
    /// Returns `false` if the timeout already fired, was already resolved,
    /// or has been superseded by a newer arming.
    pub fn resolve_timeout(&self, token: CancelationToken) -> bool {
        if self.cancelation.resolve(token) {
            self.cancelation.publish(token, TimeoutOutcome::Canceled);
            true
        } else {
            false
        }
    }

    /// Makes the fiber runnable again on its own execution context.
    pub fn resume(self: &Arc<Self>) {
        Arc::clone(self).wake();
    }

    pub(crate) fn wake(self: Arc<Self>) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.schedule();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn schedule(self: Arc<Self>) {
        match self.context.upgrade() {
            Some(context) => context.push(self),
            None => trace!("fiber {} woken after its context was dropped", self.id),
        }
    }

    /// Polls the continuation once.
    ///
    /// Runs on a scheduler thread of the fiber's own context.
    pub(crate) fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let waker = fiber_waker(self.clone());
        let mut cx = Context::from_waker(&waker);

        // Safety: RUNNING grants exclusive access to the continuation.
        let slot = unsafe { &mut *self.continuation.get() };
        let Some(continuation) = slot.as_mut() else {
            self.state.store(COMPLETED, Ordering::Release);
            return;
        };

        let poll = context::enter_fiber(&self, || continuation.as_mut().poll(&mut cx));

        match poll {
            Poll::Pending => {
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.state.store(QUEUED, Ordering::Release);
                    self.schedule();
                }
            }
            Poll::Ready(()) => {
                *slot = None;
                self.state.store(COMPLETED, Ordering::Release);
                trace!("fiber {} completed", self.id);
            }
        }
    }

    /// Drops a queued continuation that will never run.
    pub(crate) fn discard(&self) {
        if self
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Safety: RUNNING grants exclusive access to the continuation.
            let continuation = unsafe { (*self.continuation.get()).take() };
            self.state.store(COMPLETED, Ordering::Release);
            drop(continuation);
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("context", &self.context_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
