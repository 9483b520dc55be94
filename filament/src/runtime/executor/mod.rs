//! Execution contexts and their schedulers.
//!
//! - [`core`]: [`ExecutionContext`](core::ExecutionContext), the unit of
//!   fiber placement, in its single-threaded, parallel and isolated forms,
//! - [`worker`]: the scheduler loop each context thread runs.

pub(crate) mod core;
pub(crate) mod worker;
