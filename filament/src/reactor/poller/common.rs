use std::time::{Duration, Instant};

/// Token of the interrupt source (eventfd, self-pipe or `EVFILT_USER`).
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

/// Token of the timer source (`timerfd` or `EVFILT_TIMER`).
pub(crate) const TIMER_TOKEN: u64 = u64::MAX - 1;

/// Direction(s) a waiter cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// How long a single poll may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wait {
    /// Return at once with whatever is ready.
    Immediate,
    /// Block until an event, an interrupt, or the deadline.
    Until(Instant),
    /// Block until an event or an interrupt.
    Forever,
}

impl Wait {
    /// Millisecond timeout for `epoll_wait`/`poll`, rounded up so a wait
    /// never returns before its deadline.
    pub(crate) fn as_millis(self) -> i32 {
        match self {
            Wait::Immediate => 0,
            Wait::Forever => -1,
            Wait::Until(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                millis_ceil(left)
            }
        }
    }
}

fn millis_ceil(duration: Duration) -> i32 {
    let ms = duration.as_nanos().div_ceil(1_000_000);
    ms.min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_timeouts_round_up() {
        assert_eq!(millis_ceil(Duration::from_micros(1)), 1);
        assert_eq!(millis_ceil(Duration::from_millis(3)), 3);
        assert_eq!(millis_ceil(Duration::from_secs(u64::MAX / 2)), i32::MAX);
        assert_eq!(Wait::Immediate.as_millis(), 0);
        assert_eq!(Wait::Forever.as_millis(), -1);
    }
}
