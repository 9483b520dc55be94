//! Fibers, schedulers and execution contexts.
//!
//! - [`fiber`]: the unit of scheduling and its handle,
//! - `executor`: execution contexts and the scheduler loop,
//! - `core`: the [`Runtime`] that owns them,
//! - `context`: thread-local access to the current scheduler and fiber.

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod executor;
pub(crate) mod yield_now;

pub mod fiber;
