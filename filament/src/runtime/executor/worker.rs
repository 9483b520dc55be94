//! Scheduler threads.
//!
//! Each scheduler runs fibers of exactly one execution context and owns one
//! event loop. Its order of business per iteration:
//!
//! 1. fire due timers,
//! 2. run up to [`QUOTA`] fibers (local queue with the inbox appended, the
//!    context's global queue, then stealing from siblings), polling I/O
//!    without blocking whenever the quota is exhausted,
//! 3. otherwise announce itself idle and block in the event loop, or park
//!    when the loop has nothing to wait for.

use crate::reactor::driver::{DriverHandle, EventLoopDriver};
use crate::reactor::registry::Registry;
use crate::runtime::context;
use crate::runtime::executor::core::ContextInner;
use crate::runtime::fiber::FiberRef;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering, fence};
use std::time::{Duration, Instant};

/// Fibers run back to back before the event loop is polled again.
pub(crate) const QUOTA: usize = 64;

/// Blocks an idle scheduler whose event loop has nothing to wait for.
struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self, timeout: Option<Duration>) {
        let mut notified = self.notified.lock();
        if !*notified {
            match timeout {
                Some(timeout) => {
                    self.condvar.wait_for(&mut notified, timeout);
                }
                None => self.condvar.wait(&mut notified),
            }
        }
        *notified = false;
    }

    fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_one();
    }
}

/// The part of a scheduler other threads may touch.
pub(crate) struct SchedulerShared {
    index: usize,
    /// Fibers handed over by other threads (single-threaded and isolated
    /// contexts; parallel contexts use their global queue instead).
    inbox: Injector<FiberRef>,
    stealer: Stealer<FiberRef>,
    driver: Arc<DriverHandle>,
    idle: AtomicBool,
    retired: AtomicBool,
    parker: Parker,
}

impl SchedulerShared {
    pub(crate) fn new(index: usize, stealer: Stealer<FiberRef>, driver: Arc<DriverHandle>) -> Self {
        Self {
            index,
            inbox: Injector::new(),
            stealer,
            driver,
            idle: AtomicBool::new(false),
            retired: AtomicBool::new(true),
            parker: Parker::new(),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn driver(&self) -> &Arc<DriverHandle> {
        &self.driver
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn set_retired(&self, retired: bool) {
        self.retired.store(retired, Ordering::Release);
    }

    pub(crate) fn stealer(&self) -> &Stealer<FiberRef> {
        &self.stealer
    }

    /// Hands a fiber to this scheduler from any thread.
    pub(crate) fn send(&self, fiber: FiberRef) {
        self.inbox.push(fiber);
        fence(Ordering::SeqCst);
        self.notify();
    }

    /// Wakes the scheduler if it announced itself idle.
    pub(crate) fn notify(&self) {
        if self.is_idle() {
            self.wake();
        }
    }

    /// Wakes the scheduler unconditionally.
    pub(crate) fn wake(&self) {
        self.driver.interrupt();
        self.parker.unpark();
    }
}

/// Parts of a scheduler created with its context and moved onto the
/// thread when it starts.
pub(crate) struct SchedulerParts {
    pub(crate) queue: Worker<FiberRef>,
    pub(crate) driver: EventLoopDriver,
}

/// Thread-local view of the running scheduler.
pub(crate) struct Local {
    pub(crate) shared: Arc<SchedulerShared>,
    pub(crate) context: Arc<ContextInner>,
    pub(crate) queue: Worker<FiberRef>,
    pub(crate) registry: Arc<Registry>,
}

impl Local {
    /// Appends fibers handed over by other threads to the local queue.
    fn absorb_inbox(&self) {
        while let Some(fiber) = take(|| self.shared.inbox.steal()) {
            self.queue.push(fiber);
        }
    }

    /// Queues a fiber made runnable on this scheduler's own thread.
    ///
    /// Fibers already waiting in the inbox became runnable first, so they
    /// are moved ahead of it.
    pub(crate) fn push(&self, fiber: FiberRef) {
        self.absorb_inbox();
        self.queue.push(fiber);
    }
}

pub(crate) struct Scheduler {
    local: Rc<Local>,
    driver: EventLoopDriver,
}

fn take<T>(mut attempt: impl FnMut() -> Steal<T>) -> Option<T> {
    loop {
        match attempt() {
            Steal::Success(item) => return Some(item),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

impl Scheduler {
    pub(crate) fn new(shared: Arc<SchedulerShared>, context: Arc<ContextInner>, parts: SchedulerParts) -> Self {
        let registry = parts.driver.registry().clone();

        Self {
            local: Rc::new(Local {
                shared,
                context,
                queue: parts.queue,
                registry,
            }),
            driver: parts.driver,
        }
    }

    pub(crate) fn run(mut self) {
        let local = self.local.clone();
        debug!(
            "scheduler {}#{} started",
            local.context.name(),
            local.shared.index
        );

        context::enter_scheduler(local.clone(), || self.run_loop());

        while let Some(fiber) = local.queue.pop() {
            fiber.discard();
        }
        while let Some(fiber) = take(|| local.shared.inbox.steal()) {
            fiber.discard();
        }

        debug!(
            "scheduler {}#{} stopped",
            local.context.name(),
            local.shared.index
        );
    }

    fn run_loop(&mut self) {
        loop {
            if self.local.context.is_shutdown() {
                return;
            }

            self.driver.process_timers(Instant::now());

            if self.local.shared.is_retired() {
                self.forward();
            }

            let mut ran = 0;
            while ran < QUOTA {
                let Some(fiber) = self.next_fiber() else {
                    break;
                };

                let dedicated = self.local.context.is_dedicated(&fiber);
                fiber.clone().run();
                ran += 1;

                if dedicated && fiber.is_finished() {
                    debug!("isolated context {} finished", self.local.context.name());
                    self.local.context.shutdown();
                    return;
                }
            }

            if ran == QUOTA {
                if let Err(err) = self.driver.run(false) {
                    error!("scheduler {}: {err}", self.local.shared.index);
                }
                continue;
            }

            if ran == 0 {
                self.idle();
            }
        }
    }

    fn next_fiber(&self) -> Option<FiberRef> {
        let local = &*self.local;

        local.absorb_inbox();
        if let Some(fiber) = local.queue.pop() {
            return Some(fiber);
        }
        if local.shared.is_retired() {
            return None;
        }

        let injector = local.context.injector()?;
        if let Some(fiber) = take(|| injector.steal_batch_and_pop(&local.queue)) {
            return Some(fiber);
        }

        let siblings = local.context.active_schedulers();
        let count = siblings.len();
        for offset in 1..count {
            let victim = &siblings[(local.shared.index + offset) % count];
            if victim.index == local.shared.index {
                continue;
            }
            if let Some(fiber) = take(|| victim.stealer.steal_batch_and_pop(&local.queue)) {
                trace!(
                    "scheduler {} stole from scheduler {}",
                    local.shared.index, victim.index
                );
                return Some(fiber);
            }
        }

        None
    }

    /// Moves runnable fibers off a retired scheduler.
    fn forward(&self) {
        let local = &*self.local;
        let Some(injector) = local.context.injector() else {
            return;
        };

        let mut moved = 0;
        while let Some(fiber) = local.queue.pop() {
            injector.push(fiber);
            moved += 1;
        }
        while let Some(fiber) = take(|| local.shared.inbox.steal()) {
            injector.push(fiber);
            moved += 1;
        }

        if moved > 0 {
            trace!(
                "retired scheduler {} forwarded {moved} fibers",
                local.shared.index
            );
            local.context.notify_one();
        }
    }

    fn has_pending(&self) -> bool {
        let local = &*self.local;

        if !local.queue.is_empty() || !local.shared.inbox.is_empty() {
            return true;
        }
        if local.shared.is_retired() {
            return false;
        }
        local
            .context
            .injector()
            .is_some_and(|injector| !injector.is_empty())
    }

    fn idle(&mut self) {
        let shared = self.local.shared.clone();

        shared.idle.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        if self.has_pending() || self.local.context.is_shutdown() {
            shared.idle.store(false, Ordering::SeqCst);
            return;
        }

        match self.driver.run(true) {
            Ok(true) => {}
            Ok(false) => shared.parker.park(None),
            Err(_) => shared.parker.park(Some(Duration::from_millis(10))),
        }

        shared.idle.store(false, Ordering::SeqCst);
    }
}
