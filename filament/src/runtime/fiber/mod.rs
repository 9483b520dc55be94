//! Fibers: the unit of scheduling.
//!
//! A fiber wraps a `Send + 'static` future. Its result travels to the
//! [`FiberHandle`] returned at spawn time; a panic inside the fiber is
//! caught, logged and resumed in whoever awaits the handle.

pub(crate) mod cancel;
pub(crate) mod handle;
pub(crate) mod state;
pub(crate) mod waker;

pub mod core;

pub use self::core::{Fiber, FiberRef};
pub use cancel::{CancelationToken, TimeoutOutcome};
pub use handle::FiberHandle;

use crate::runtime::context;
use crate::runtime::executor::core::ExecutionContext;

/// The fiber currently running on this thread, if any.
pub fn current() -> Option<FiberRef> {
    context::current_fiber()
}

/// Spawns a fiber on the execution context of the calling fiber.
///
/// Inside an isolated context the fiber goes to that context's fallback.
///
/// # Panics
///
/// Panics when called from a thread that is not running a scheduler, or
/// when the current context is shutting down.
pub fn spawn<F, T>(future: F) -> FiberHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let context = ExecutionContext::current()
        .expect("spawn must be called from a filament scheduler thread");

    match context.spawn(future) {
        Ok(handle) => handle,
        Err(err) => panic!("spawn failed: {err}"),
    }
}
