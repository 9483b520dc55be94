use crate::reactor::driver::{DriverHandle, TimerAction};
use crate::reactor::timer::{TimerKey, TimerKind};
use crate::runtime::context;
use crate::runtime::fiber::{CancelationToken, FiberRef, TimeoutOutcome};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Returned by [`timeout`] when the deadline passes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline has elapsed")]
pub struct Elapsed(());

/// Suspends the current fiber until either `duration` passes or someone
/// resolves the armed token.
///
/// `on_armed` runs once, right after the token is armed and the timer is
/// in place, with the current fiber and its token. Hand both to whatever
/// event should end the wait early: that party calls
/// [`Fiber::resolve_timeout`](crate::fiber::Fiber::resolve_timeout) and,
/// only if it returns `true`, [`Fiber::resume`](crate::fiber::Fiber::resume).
/// Exactly one of the timer and the resolvers wins.
///
/// # Panics
///
/// Panics if polled outside of a fiber.
///
/// # Examples
///
/// ```rust,ignore
/// let outcome = arm_timeout(Duration::from_millis(50), |fiber, token| {
///     waiters.lock().push((fiber.clone(), token));
/// })
/// .await;
///
/// if outcome == TimeoutOutcome::Expired {
///     // nobody showed up in time
/// }
/// ```
pub fn arm_timeout<F>(duration: Duration, on_armed: F) -> ArmTimeout<F>
where
    F: FnOnce(&FiberRef, CancelationToken),
{
    ArmTimeout {
        state: ArmState::Init {
            deadline: Instant::now() + duration,
            on_armed: Some(on_armed),
        },
    }
}

enum ArmState<F> {
    Init {
        deadline: Instant,
        on_armed: Option<F>,
    },
    Armed {
        fiber: FiberRef,
        token: CancelationToken,
        driver: Arc<DriverHandle>,
        key: TimerKey,
    },
    Done,
}

/// Future returned by [`arm_timeout`].
///
/// Dropping it while armed withdraws the token, so a later resolver loses
/// and the timer never fires.
pub struct ArmTimeout<F> {
    state: ArmState<F>,
}

impl<F> Unpin for ArmTimeout<F> {}

impl<F> ArmTimeout<F>
where
    F: FnOnce(&FiberRef, CancelationToken),
{
    fn arm(&mut self, cx: &mut Context<'_>) {
        let ArmState::Init { deadline, on_armed } = &mut self.state else {
            return;
        };

        let fiber = context::current_fiber().expect("arm_timeout polled outside of a fiber");
        let driver = context::current_driver().expect("arm_timeout polled outside of runtime");

        let token = fiber.cancelation().arm();
        let key = driver.add_timer(
            *deadline,
            TimerKind::Timeout,
            TimerAction::Resolve {
                fiber: fiber.clone(),
                token,
                waker: cx.waker().clone(),
            },
        );

        let callback = on_armed.take();
        self.state = ArmState::Armed {
            fiber: fiber.clone(),
            token,
            driver,
            key,
        };

        if let Some(callback) = callback {
            callback(&fiber, token);
        }
    }
}

impl<F> Future for ArmTimeout<F>
where
    F: FnOnce(&FiberRef, CancelationToken),
{
    type Output = TimeoutOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if matches!(this.state, ArmState::Init { .. }) {
            this.arm(cx);
        }

        let outcome = match &this.state {
            ArmState::Armed {
                fiber,
                token,
                driver,
                key,
            } => match fiber.cancelation().outcome(*token) {
                Some(TimeoutOutcome::Expired) => TimeoutOutcome::Expired,
                Some(TimeoutOutcome::Canceled) => {
                    driver.cancel_timer(*key);
                    TimeoutOutcome::Canceled
                }
                None => return Poll::Pending,
            },
            ArmState::Init { .. } => return Poll::Pending,
            ArmState::Done => panic!("ArmTimeout polled after completion"),
        };

        this.state = ArmState::Done;
        Poll::Ready(outcome)
    }
}

impl<F> Drop for ArmTimeout<F> {
    fn drop(&mut self) {
        if let ArmState::Armed {
            fiber,
            token,
            driver,
            key,
        } = &self.state
        {
            fiber.cancelation().resolve(*token);
            driver.cancel_timer(*key);
        }
    }
}

/// Requires `future` to complete within `duration`.
///
/// The deadline uses a cancelable timeout-category timer: it is removed as
/// soon as `future` finishes or the `Timeout` is dropped, and it may fire
/// up to a millisecond late.
///
/// # Examples
///
/// ```rust,ignore
/// match timeout(Duration::from_secs(1), stream.read(&mut buf)).await {
///     Ok(n) => println!("read {n:?}"),
///     Err(_) => println!("peer too slow"),
/// }
/// ```
pub fn timeout<F: Future>(duration: Duration, future: F) -> Timeout<F> {
    Timeout {
        future,
        deadline: Instant::now() + duration,
        timer: None,
    }
}

/// Future returned by [`timeout`].
pub struct Timeout<F> {
    future: F,
    deadline: Instant,
    timer: Option<(Arc<DriverHandle>, TimerKey, Waker)>,
}

impl<F> Timeout<F> {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn into_inner(self) -> F
    where
        F: Unpin,
    {
        let mut this = std::mem::ManuallyDrop::new(self);
        this.cancel();
        // Safety: `this` is never dropped, so `future` is moved out once.
        unsafe { std::ptr::read(&this.future) }
    }

    fn cancel(&mut self) {
        if let Some((driver, key, _)) = self.timer.take() {
            driver.cancel_timer(key);
        }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: `future` is structurally pinned and never moved out of a
        // pinned `Timeout`; the other fields are not pinned.
        let this = unsafe { self.get_unchecked_mut() };
        let future = unsafe { Pin::new_unchecked(&mut this.future) };

        if let Poll::Ready(output) = future.poll(cx) {
            this.cancel();
            return Poll::Ready(Ok(output));
        }

        if Instant::now() >= this.deadline {
            this.cancel();
            return Poll::Ready(Err(Elapsed(())));
        }

        let current = this
            .timer
            .as_ref()
            .is_some_and(|(_, _, waker)| waker.will_wake(cx.waker()));

        if !current {
            this.cancel();
            let driver = context::current_driver().expect("Timeout polled outside of runtime");
            let key = driver.add_timer(
                this.deadline,
                TimerKind::Timeout,
                TimerAction::Wake(cx.waker().clone()),
            );
            this.timer = Some((driver, key, cx.waker().clone()));
        }

        Poll::Pending
    }
}

impl<F> Drop for Timeout<F> {
    fn drop(&mut self) {
        self.cancel();
    }
}
