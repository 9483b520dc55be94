//! Synchronization primitives for fibers.
//!
//! Waiting on any of these suspends the fiber, never its scheduler thread.
//!
//! - [`Mutex`]: mutual exclusion with FIFO hand-off,
//! - [`WaitGroup`]: wait for a set of fibers to finish.

mod mutex;
mod wait_group;

pub use mutex::{Lock, Mutex, MutexGuard};
pub use wait_group::{Wait, WaitGroup};
