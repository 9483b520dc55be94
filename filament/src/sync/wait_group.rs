use crate::error::{Error, Result};
use crate::runtime::fiber::{CancelationToken, FiberRef, TimeoutOutcome};
use crate::time::arm_timeout;

use parking_lot::Mutex;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// A counting barrier for fibers.
///
/// [`add`](Self::add) raises the counter, [`done`](Self::done) lowers it,
/// and [`wait`](Self::wait) suspends until it reaches zero. Clones share
/// the same counter.
///
/// The counter is never observed below zero. A decrement that would take
/// it there is rejected: the counter keeps its value, the group is
/// poisoned, and every waiter is released with [`Error::Poisoned`].
///
/// # Examples
///
/// ```rust,ignore
/// let group = WaitGroup::new();
///
/// for job in jobs {
///     group.add(1)?;
///     let group = group.clone();
///     filament::spawn(async move {
///         job.run().await;
///         group.done().unwrap();
///     });
/// }
///
/// group.wait().await?;
/// ```
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: AtomicI64,
    poisoned: AtomicBool,
    next_id: AtomicU64,
    waiters: Mutex<Vec<Waiter>>,
}

enum Waiter {
    Plain {
        id: u64,
        waker: Waker,
    },
    Timed {
        id: u64,
        fiber: FiberRef,
        token: CancelationToken,
    },
}

impl Waiter {
    fn id(&self) -> u64 {
        match self {
            Waiter::Plain { id, .. } | Waiter::Timed { id, .. } => *id,
        }
    }

    fn release(self) {
        match self {
            Waiter::Plain { waker, .. } => waker.wake(),
            Waiter::Timed { fiber, token, .. } => {
                if fiber.resolve_timeout(token) {
                    fiber.resume();
                }
            }
        }
    }
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether a waiter registering now should return at once.
    fn settled(&self) -> bool {
        self.poisoned.load(Ordering::Acquire) || self.count.load(Ordering::Acquire) == 0
    }

    fn verdict(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            Err(Error::Poisoned)
        } else {
            Ok(())
        }
    }

    fn release_all(&self) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            waiter.release();
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|w| w.id() == id) {
            Some(pos) => {
                waiters.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` (which may be negative) to the counter.
    ///
    /// Reaching zero releases every waiter.
    ///
    /// # Errors
    ///
    /// [`Error::NegativeCounter`] if the result would be below zero; the
    /// group is poisoned as a side effect. [`Error::CounterOverflow`] if an
    /// increment does not fit; the group is left untouched.
    /// [`Error::Poisoned`] on a group already poisoned.
    pub fn add(&self, delta: i64) -> Result<()> {
        let inner = &self.inner;
        if inner.poisoned.load(Ordering::Acquire) {
            return Err(Error::Poisoned);
        }

        let update = inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(delta).filter(|next| *next >= 0)
            });

        match update {
            Ok(previous) => {
                if previous + delta == 0 {
                    inner.release_all();
                }
                Ok(())
            }
            Err(current) if delta > 0 => Err(Error::CounterOverflow { current, delta }),
            Err(current) => {
                inner.poisoned.store(true, Ordering::Release);
                inner.release_all();
                Err(Error::NegativeCounter { current, delta })
            }
        }
    }

    /// Shorthand for `add(-1)`.
    pub fn done(&self) -> Result<()> {
        self.add(-1)
    }

    pub fn count(&self) -> i64 {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }

    /// Suspends until the counter reaches zero.
    ///
    /// Completes at once if it already is zero.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            inner: &self.inner,
            id: None,
        }
    }

    /// Like [`wait`](Self::wait), giving up after `duration`.
    ///
    /// Returns `Ok(true)` if the counter reached zero and `Ok(false)` on
    /// timeout.
    ///
    /// # Panics
    ///
    /// Panics if awaited outside of a fiber.
    pub async fn wait_timeout(&self, duration: Duration) -> Result<bool> {
        let inner = &*self.inner;
        if inner.settled() {
            return inner.verdict().map(|()| true);
        }

        let registration = Registration {
            inner,
            id: inner.next_id(),
        };
        let id = registration.id;

        let outcome = arm_timeout(duration, |fiber, token| {
            let mut waiters = inner.waiters.lock();
            if inner.settled() {
                drop(waiters);
                if fiber.resolve_timeout(token) {
                    fiber.resume();
                }
                return;
            }

            waiters.push(Waiter::Timed {
                id,
                fiber: fiber.clone(),
                token,
            });
        })
        .await;

        drop(registration);

        match outcome {
            TimeoutOutcome::Expired => Ok(false),
            TimeoutOutcome::Canceled => inner.verdict().map(|()| true),
        }
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

/// Removes a timed waiter that is still listed when its wait ends.
struct Registration<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.inner.remove(self.id);
    }
}

/// Future returned by [`WaitGroup::wait`].
pub struct Wait<'a> {
    inner: &'a Inner,
    id: Option<u64>,
}

impl Future for Wait<'_> {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner;
        let mut waiters = inner.waiters.lock();

        if let Some(id) = self.id {
            let listed = waiters.iter_mut().find(|w| w.id() == id);
            return match listed {
                Some(Waiter::Plain { waker, .. }) => {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                    Poll::Pending
                }
                _ => {
                    drop(waiters);
                    self.id = None;
                    Poll::Ready(inner.verdict())
                }
            };
        }

        if inner.settled() {
            drop(waiters);
            return Poll::Ready(inner.verdict());
        }

        let id = inner.next_id();
        waiters.push(Waiter::Plain {
            id,
            waker: cx.waker().clone(),
        });
        self.id = Some(id);

        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.inner.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(future: &mut F, waker: &Waker) -> Poll<F::Output> {
        let mut cx = Context::from_waker(waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn counts_up_and_down() {
        let group = WaitGroup::new();
        group.add(3).unwrap();
        group.done().unwrap();
        assert_eq!(group.count(), 2);
        group.add(-2).unwrap();
        assert_eq!(group.count(), 0);
    }

    #[test]
    fn negative_counter_is_rejected_and_poisons() {
        let group = WaitGroup::new();
        group.add(1).unwrap();

        let err = group.add(-2).unwrap_err();
        assert!(matches!(
            err,
            Error::NegativeCounter {
                current: 1,
                delta: -2
            }
        ));
        assert_eq!(group.count(), 1);
        assert!(group.is_poisoned());
        assert!(matches!(group.add(1), Err(Error::Poisoned)));
    }

    #[test]
    fn overflow_is_rejected_without_poisoning() {
        let group = WaitGroup::new();
        group.add(2).unwrap();

        let err = group.add(i64::MAX).unwrap_err();
        assert!(matches!(
            err,
            Error::CounterOverflow {
                current: 2,
                delta: i64::MAX
            }
        ));
        assert_eq!(group.count(), 2);
        assert!(!group.is_poisoned());

        group.add(-2).unwrap();
        assert_eq!(group.count(), 0);
    }

    #[test]
    fn zero_counter_does_not_suspend() {
        let group = WaitGroup::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter);

        let mut wait = group.wait();
        assert!(matches!(poll_once(&mut wait, &waker), Poll::Ready(Ok(()))));
    }

    #[test]
    fn reaching_zero_wakes_every_waiter() {
        let group = WaitGroup::new();
        group.add(2).unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());

        let mut first = group.wait();
        let mut second = group.wait();
        assert!(poll_once(&mut first, &waker).is_pending());
        assert!(poll_once(&mut second, &waker).is_pending());

        group.done().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        group.done().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        // Released waiters finish even if the counter goes up again.
        group.add(1).unwrap();
        assert!(matches!(poll_once(&mut first, &waker), Poll::Ready(Ok(()))));
        assert!(matches!(poll_once(&mut second, &waker), Poll::Ready(Ok(()))));
    }

    #[test]
    fn poisoning_releases_waiters_with_an_error() {
        let group = WaitGroup::new();
        group.add(1).unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());

        let mut wait = group.wait();
        assert!(poll_once(&mut wait, &waker).is_pending());

        assert!(group.add(-5).is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(matches!(
            poll_once(&mut wait, &waker),
            Poll::Ready(Err(Error::Poisoned))
        ));
    }

    #[test]
    fn dropped_waiter_is_unlisted() {
        let group = WaitGroup::new();
        group.add(1).unwrap();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());

        let mut wait = group.wait();
        assert!(poll_once(&mut wait, &waker).is_pending());
        drop(wait);

        assert!(group.inner.waiters.lock().is_empty());
        group.done().unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
