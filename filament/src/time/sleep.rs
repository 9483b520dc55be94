use crate::reactor::driver::{DriverHandle, TimerAction};
use crate::reactor::timer::TimerKind;
use crate::runtime::context;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Creates a future that completes after `duration`.
///
/// # Panics
///
/// Panics if polled outside of a scheduler thread.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Creates a future that completes at `deadline`.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        registered: None,
    }
}

/// A future that completes once its deadline has passed.
///
/// The timer goes into the event loop of the scheduler that first polls
/// it, at full precision. Sleep timers always run to expiry: dropping a
/// `Sleep` early leaves its timer in place and the fiber sees one
/// spurious wakeup when it fires.
pub struct Sleep {
    deadline: Instant,
    registered: Option<(Arc<DriverHandle>, Waker)>,
}

impl Sleep {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.is_elapsed() {
            return Poll::Ready(());
        }

        let current = this
            .registered
            .as_ref()
            .is_some_and(|(_, waker)| waker.will_wake(cx.waker()));

        if !current {
            let driver = context::current_driver().expect("Sleep polled outside of runtime");
            driver.add_timer(
                this.deadline,
                TimerKind::Timer,
                TimerAction::Wake(cx.waker().clone()),
            );
            this.registered = Some((driver, cx.waker().clone()));
        }

        Poll::Pending
    }
}
