//! Timers integrated with the scheduler's event loop.
//!
//! - [`sleep`] suspends for a fixed duration and is never canceled,
//! - [`arm_timeout`] parks the fiber until the timer or an explicit
//!   resolver wins its cancelation token,
//! - [`timeout`] bounds how long a future may run.

mod sleep;
mod timeout;

#[doc(inline)]
pub use sleep::{Sleep, sleep, sleep_until};

#[doc(inline)]
pub use timeout::{ArmTimeout, Elapsed, Timeout, arm_timeout, timeout};

pub use crate::runtime::fiber::{CancelationToken, TimeoutOutcome};
