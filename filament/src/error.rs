//! Runtime error type.
//!
//! Errors fall into a few families:
//! - protocol violations (a logic bug in the caller, e.g. driving a
//!   [`WaitGroup`](crate::sync::WaitGroup) below zero),
//! - resource staleness (a poll-descriptor reference that outlived its slot),
//! - platform and configuration failures.
//!
//! Timeout expiry is never an error; see [`TimeoutOutcome`](crate::time::TimeoutOutcome).

use std::io;
use std::os::fd::RawFd;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A wait group decrement would have made the counter negative.
    #[error("wait group counter would become negative ({current} + {delta})")]
    NegativeCounter { current: i64, delta: i64 },

    /// A wait group increment would overflow the counter. The group is left
    /// unchanged and usable.
    #[error("wait group counter overflow ({current} + {delta})")]
    CounterOverflow { current: i64, delta: i64 },

    /// The wait group was previously driven negative and can no longer be used.
    #[error("wait group is poisoned by an earlier negative counter")]
    Poisoned,

    /// A fiber was handed to an execution context it does not belong to.
    #[error("fiber {fiber} belongs to context `{owner}`, not `{target}`")]
    ForeignFiber {
        fiber: u64,
        owner: String,
        target: String,
    },

    /// A fiber was spawned directly into an isolated context.
    #[error("isolated context `{0}` only runs its dedicated fiber")]
    IsolatedSpawn(String),

    /// A handle cannot move to another event loop while fibers wait on it.
    #[error("fd {fd} has pending waiters on another event loop")]
    Busy { fd: RawFd },

    /// A poll-descriptor reference whose slot has been released or reused.
    #[error("stale poll descriptor (slot {slot}, generation {generation})")]
    Stale { slot: u32, generation: u32 },

    /// The operation requires a running scheduler on the current thread.
    #[error("operation requires a filament scheduler on the current thread")]
    OutsideRuntime,

    /// The target execution context has been shut down.
    #[error("execution context `{0}` is shut down")]
    ShuttingDown(String),

    /// The operation is not available for this context kind or platform.
    #[error("{0} is not supported here")]
    Unsupported(&'static str),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An underlying system call failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::Busy { .. } => io::Error::new(io::ErrorKind::ResourceBusy, err),
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_maps_to_resource_busy() {
        let err: io::Error = Error::Busy { fd: 4 }.into();
        assert_eq!(err.kind(), io::ErrorKind::ResourceBusy);
    }

    #[test]
    fn other_errors_map_to_other() {
        let err: io::Error = Error::Stale { slot: 1, generation: 2 }.into();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        let err: io::Error = Error::OutsideRuntime.into();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn io_errors_pass_through() {
        let err: io::Error = Error::Io(io::ErrorKind::WouldBlock.into()).into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
