//! Per-scheduler event loop.
//!
//! Every scheduler owns exactly one [`EventLoopDriver`]. The driver's
//! shared half, [`DriverHandle`], lives in the [`Registry`] so that other
//! threads can interrupt a blocked wait, deregister descriptors on close,
//! or delete timers armed on this loop.

use crate::reactor::arena::ArenaIndex;
use crate::reactor::event::Event;
use crate::reactor::poller::Poller;
use crate::reactor::poller::common::Wait;
use crate::reactor::registry::Registry;
use crate::reactor::timer::{TimerKey, TimerKind, TimerStore};
use crate::runtime::executor::core::ContextId;
use crate::runtime::fiber::{CancelationToken, FiberRef, TimeoutOutcome};

use log::{error, trace};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Waker;
use std::time::{Duration, Instant};

/// Identifies one event loop inside a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DriverId(pub(crate) usize);

/// What to do when a timer fires.
pub(crate) enum TimerAction {
    /// Plain sleep: wake the sleeper.
    Wake(Waker),
    /// Armed timeout: resume `fiber` only if the expiry wins its token.
    Resolve {
        fiber: FiberRef,
        token: CancelationToken,
        waker: Waker,
    },
}

impl TimerAction {
    fn fire(self) {
        match self {
            TimerAction::Wake(waker) => waker.wake(),
            TimerAction::Resolve {
                fiber,
                token,
                waker,
            } => {
                let word = fiber.cancelation();
                if word.resolve(token) {
                    word.publish(token, TimeoutOutcome::Expired);
                    waker.wake();
                } else {
                    trace!(
                        "timeout {} of fiber {} lost to an explicit resume",
                        token.generation(),
                        fiber.id()
                    );
                }
            }
        }
    }
}

/// Thread-safe half of an event loop.
pub(crate) struct DriverHandle {
    id: DriverId,
    context: ContextId,
    pub(crate) poller: Poller,
    timers: Mutex<TimerStore<TimerAction>>,
    /// Descriptors registered with `poller`.
    subscriptions: AtomicUsize,
    epoch: Instant,
}

impl DriverHandle {
    pub(crate) fn new(id: DriverId, context: ContextId, poller: Poller) -> Self {
        Self {
            id,
            context,
            poller,
            timers: Mutex::new(TimerStore::new()),
            subscriptions: AtomicUsize::new(0),
            epoch: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> DriverId {
        self.id
    }

    pub(crate) fn context(&self) -> ContextId {
        self.context
    }

    /// Schedules `action` at `expiry`.
    ///
    /// [`TimerKind::Timeout`] deadlines are rounded up to the next whole
    /// millisecond of this loop's clock, so bursts of timeouts armed
    /// together share a wakeup.
    pub(crate) fn add_timer(&self, expiry: Instant, kind: TimerKind, action: TimerAction) -> TimerKey {
        let expiry = match kind {
            TimerKind::Timer => expiry,
            TimerKind::Timeout => self.coarsen(expiry),
        };

        let (key, _) = self.timers.lock().insert(expiry, kind, action);
        key
    }

    /// Deletes a pending timer. Returns `false` if it already fired.
    pub(crate) fn cancel_timer(&self, key: TimerKey) -> bool {
        self.timers.lock().cancel(key).0
    }

    pub(crate) fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.timers.lock().next_expiry()
    }

    fn coarsen(&self, expiry: Instant) -> Instant {
        let since = expiry.saturating_duration_since(self.epoch);
        let ms = since.as_nanos().div_ceil(1_000_000);
        let ms = u64::try_from(ms).unwrap_or(u64::MAX);
        self.epoch
            .checked_add(Duration::from_millis(ms))
            .unwrap_or(expiry)
    }

    pub(crate) fn interrupt(&self) {
        self.poller.interrupt();
    }

    pub(crate) fn subscribed(&self) {
        self.subscriptions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unsubscribed(&self) {
        let _ = self
            .subscriptions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    /// Drops every pending timer without firing it.
    pub(crate) fn clear_timers(&self) {
        let drained = std::mem::replace(&mut *self.timers.lock(), TimerStore::new());
        drop(drained);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Waiting,
    Dispatching,
}

/// The scheduler-owned half of an event loop.
pub(crate) struct EventLoopDriver {
    handle: Arc<DriverHandle>,
    registry: Arc<Registry>,
    events: Vec<Event>,
    state: DriverState,
}

impl EventLoopDriver {
    pub(crate) fn new(handle: Arc<DriverHandle>, registry: Arc<Registry>) -> Self {
        Self {
            handle,
            registry,
            events: Vec::with_capacity(256),
            state: DriverState::Idle,
        }
    }

    pub(crate) fn handle(&self) -> &Arc<DriverHandle> {
        &self.handle
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Fires every timer due at `now`. Returns how many fired.
    ///
    /// Actions run after the store lock is released; they may wake fibers
    /// whose first move is to arm or delete another timer here.
    pub(crate) fn process_timers(&mut self, now: Instant) -> usize {
        let mut due = Vec::new();
        self.handle
            .timers
            .lock()
            .drain_expired(now, |_, action| due.push(action));

        let fired = due.len();
        for action in due {
            action.fire();
        }
        fired
    }

    /// Runs one iteration of the event loop.
    ///
    /// Non-blocking: polls without waiting and dispatches whatever is
    /// ready; returns whether anything was dispatched.
    ///
    /// Blocking: returns `false` at once when the loop has neither timers
    /// nor registered descriptors, so the caller can park instead.
    /// Otherwise waits until an I/O event, the earliest timer, or an
    /// interrupt, dispatches, and returns `true`.
    pub(crate) fn run(&mut self, blocking: bool) -> io::Result<bool> {
        debug_assert_eq!(self.state, DriverState::Idle);

        let wait = if blocking {
            match self.handle.next_expiry() {
                Some(deadline) => Wait::Until(deadline),
                None if self.handle.subscriptions() > 0 => Wait::Forever,
                None => return Ok(false),
            }
        } else {
            Wait::Immediate
        };

        self.state = DriverState::Waiting;
        let polled = self.handle.poller.poll(&mut self.events, wait);
        self.state = DriverState::Dispatching;

        let mut dispatched = 0;
        for event in self.events.drain(..) {
            dispatched += dispatch(&self.registry, event);
        }
        dispatched += self.process_timers(Instant::now());

        self.state = DriverState::Idle;

        if let Err(err) = polled {
            error!("event loop {:?}: poll failed: {err}", self.handle.id);
            return Err(err);
        }

        Ok(blocking || dispatched > 0)
    }
}

fn dispatch(registry: &Registry, event: Event) -> usize {
    let index = ArenaIndex::from_token(event.token);

    match registry
        .arena()
        .ready(index, event.readable, event.writable)
    {
        Ok(wakers) => {
            let n = wakers.len();
            for waker in wakers {
                waker.wake();
            }
            n
        }
        Err(err) => {
            trace!("dropping event for {index:?}: {err}");
            0
        }
    }
}

impl Drop for EventLoopDriver {
    fn drop(&mut self) {
        self.handle.clear_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::reactor::poller::platform::{sys_close, sys_pipe, sys_write};

    use std::sync::atomic::AtomicUsize;
    use std::task::Wake;
    use std::thread;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Arc<Counter>, Waker) {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        (counter, waker)
    }

    fn driver() -> EventLoopDriver {
        Registry::new(Backend::platform_default())
            .create_driver(ContextId::next())
            .unwrap()
    }

    #[test]
    fn blocking_run_with_nothing_registered_returns_false() {
        let mut driver = driver();
        assert!(!driver.run(true).unwrap());
        assert!(!driver.run(false).unwrap());
    }

    #[test]
    fn timer_fires_after_its_deadline() {
        let mut driver = driver();
        let (counter, waker) = counter();

        let start = Instant::now();
        driver
            .handle()
            .add_timer(start + Duration::from_millis(15), TimerKind::Timer, TimerAction::Wake(waker));

        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) > 0 {
                break;
            }
            driver.run(true).unwrap();
        }

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(driver.handle().pending_timers(), 0);
    }

    #[test]
    fn canceled_timer_never_fires() {
        let mut driver = driver();
        let (counter, waker) = counter();

        let key = driver.handle().add_timer(
            Instant::now() + Duration::from_millis(5),
            TimerKind::Timeout,
            TimerAction::Wake(waker),
        );
        assert!(driver.handle().cancel_timer(key));
        assert!(!driver.handle().cancel_timer(key));

        thread::sleep(Duration::from_millis(10));
        driver.process_timers(Instant::now());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timeouts_are_rounded_up_to_the_millisecond() {
        let driver = driver();
        let handle = driver.handle();

        let expiry = Instant::now() + Duration::from_micros(1500);
        let coarse = handle.coarsen(expiry);
        assert!(coarse >= expiry);
        assert!(coarse - expiry < Duration::from_millis(1));
    }

    #[test]
    fn interrupt_ends_a_blocking_wait() {
        let mut driver = driver();
        let (_, waker) = counter();
        driver.handle().add_timer(
            Instant::now() + Duration::from_secs(10),
            TimerKind::Timer,
            TimerAction::Wake(waker),
        );

        let handle = driver.handle().clone();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.interrupt();
        });

        let start = Instant::now();
        assert!(driver.run(true).unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        interrupter.join().unwrap();
    }

    #[test]
    fn readiness_wakes_parked_reader() {
        let mut driver = driver();
        let registry = driver.registry().clone();
        let (r, w) = sys_pipe().unwrap();
        let (counter, waker) = counter();

        let (index, owner) = registry.subscribe(r, driver.handle()).unwrap();
        assert!(registry.arena().readers(index, |l| l.park(1, &waker)).unwrap());
        owner.poller.arm(r, index.to_token(), crate::reactor::poller::common::Interest::READ).unwrap();

        sys_write(w, b"x").unwrap();
        for _ in 0..100 {
            if counter.0.load(Ordering::SeqCst) > 0 {
                break;
            }
            driver.run(true).unwrap();
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        registry.close(r);
        sys_close(w);
    }
}
