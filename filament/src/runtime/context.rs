use crate::reactor::driver::DriverHandle;
use crate::runtime::executor::worker::Local;
use crate::runtime::fiber::FiberRef;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

thread_local! {
    /// Scheduler owning the current thread.
    ///
    /// Set for the whole life of a scheduler thread; `None` everywhere
    /// else, including threads blocked in
    /// [`Runtime::block_on`](crate::Runtime::block_on).
    static CURRENT_SCHEDULER: RefCell<Option<Rc<Local>>> = const { RefCell::new(None) };

    /// Fiber being polled on the current thread.
    static CURRENT_FIBER: RefCell<Option<FiberRef>> = const { RefCell::new(None) };
}

/// Installs `local` as the current scheduler while `f` runs.
pub(crate) fn enter_scheduler<R>(local: Rc<Local>, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_SCHEDULER.with(|cell| cell.replace(Some(local)));
    let out = f();
    CURRENT_SCHEDULER.with(|cell| cell.replace(previous));
    out
}

pub(crate) fn scheduler() -> Option<Rc<Local>> {
    CURRENT_SCHEDULER.with(|cell| cell.borrow().clone())
}

/// Marks `fiber` as current while `f` polls it.
pub(crate) fn enter_fiber<R>(fiber: &FiberRef, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_FIBER.with(|cell| cell.replace(Some(fiber.clone())));
    let out = f();
    CURRENT_FIBER.with(|cell| cell.replace(previous));
    out
}

pub(crate) fn current_fiber() -> Option<FiberRef> {
    CURRENT_FIBER.with(|cell| cell.borrow().clone())
}

/// Event loop of the scheduler running on this thread.
pub(crate) fn current_driver() -> Option<Arc<DriverHandle>> {
    scheduler().map(|local| local.context.event_loop().clone())
}
