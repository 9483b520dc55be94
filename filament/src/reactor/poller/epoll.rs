//! Linux `epoll` backend.
//!
//! Descriptors are added once, edge-triggered, for both directions and stay
//! registered until they are closed. Deadlines go through a `timerfd` armed
//! with an absolute `CLOCK_MONOTONIC` expiry, which gives nanosecond
//! resolution instead of `epoll_wait`'s milliseconds. When no `timerfd` can
//! be created the poller falls back to the millisecond timeout.

use super::common::{Interest, TIMER_TOKEN, WAKE_TOKEN, Wait};
use crate::reactor::event::{Event, push_event};

use libc::{
    CLOCK_MONOTONIC, EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
    EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP, TFD_CLOEXEC, TFD_NONBLOCK,
    TFD_TIMER_ABSTIME, epoll_event, itimerspec, timespec,
};
use log::{trace, warn};
use parking_lot::Mutex;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

const READ_MASK: u32 = (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32;
const WRITE_MASK: u32 = (EPOLLOUT | EPOLLHUP | EPOLLERR) as u32;

pub(crate) struct EpollPoller {
    epoll: RawFd,
    eventfd: RawFd,
    timerfd: Option<RawFd>,
    /// Deadline the `timerfd` is currently armed for.
    armed: Mutex<Option<Instant>>,
    buffer: Mutex<Vec<epoll_event>>,
}

impl EpollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        let mut poller = Self {
            epoll,
            eventfd,
            timerfd: None,
            armed: Mutex::new(None),
            buffer: Mutex::new(Vec::with_capacity(256)),
        };

        poller.ctl_add(eventfd, WAKE_TOKEN, EPOLLIN as u32)?;

        let timerfd = unsafe { libc::timerfd_create(CLOCK_MONOTONIC, TFD_NONBLOCK | TFD_CLOEXEC) };
        if timerfd < 0 {
            warn!(
                "timerfd unavailable ({}), using millisecond epoll timeouts",
                io::Error::last_os_error()
            );
        } else if let Err(err) = poller.ctl_add(timerfd, TIMER_TOKEN, EPOLLIN as u32) {
            warn!("cannot watch timerfd ({err}), using millisecond epoll timeouts");
            unsafe { libc::close(timerfd) };
        } else {
            poller.timerfd = Some(timerfd);
        }

        Ok(poller)
    }

    fn ctl_add(&self, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut event = epoll_event { events, u64: token };

        let rc = unsafe { libc::epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Adds `fd` for the rest of its life: both directions, edge-triggered.
    pub(crate) fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl_add(
            fd,
            token,
            (EPOLLIN | EPOLLOUT | EPOLLRDHUP | EPOLLET) as u32,
        )
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        let rc = unsafe { libc::epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            trace!("epoll: deregister fd {fd}: {}", io::Error::last_os_error());
        }
    }

    /// Edge-triggered registrations need no per-wait rearming.
    pub(crate) fn arm(&self, _fd: RawFd, _token: u64, _interest: Interest) -> io::Result<()> {
        Ok(())
    }

    pub(crate) fn interrupt(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(self.eventfd, &one as *const u64 as *const _, 8);
        }
    }

    pub(crate) fn poll(&self, events: &mut Vec<Event>, wait: Wait) -> io::Result<()> {
        let timeout_ms = match (self.timerfd, wait) {
            (Some(timerfd), Wait::Until(deadline)) => {
                self.arm_timer(timerfd, Some(deadline))?;
                -1
            }
            (Some(timerfd), Wait::Forever) => {
                self.arm_timer(timerfd, None)?;
                -1
            }
            _ => wait.as_millis(),
        };

        let mut buffer = self.buffer.lock();
        buffer.clear();

        let n = unsafe {
            libc::epoll_wait(
                self.epoll,
                buffer.as_mut_ptr(),
                buffer.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe { buffer.set_len(n as usize) };

        for ev in buffer.iter() {
            let token = ev.u64;
            let flags = ev.events;

            match token {
                WAKE_TOKEN => drain(self.eventfd),
                TIMER_TOKEN => {
                    if let Some(timerfd) = self.timerfd {
                        drain(timerfd);
                    }
                    *self.armed.lock() = None;
                }
                _ => push_event(
                    events,
                    Event {
                        token,
                        readable: flags & READ_MASK != 0,
                        writable: flags & WRITE_MASK != 0,
                    },
                ),
            }
        }

        Ok(())
    }

    fn arm_timer(&self, timerfd: RawFd, deadline: Option<Instant>) -> io::Result<()> {
        let mut armed = self.armed.lock();
        if *armed == deadline {
            return Ok(());
        }

        let it_value = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                monotonic_after(left.max(Duration::from_nanos(1)))?
            }
            None => timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
        };

        let spec = itimerspec {
            it_interval: timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value,
        };

        let rc = unsafe {
            libc::timerfd_settime(timerfd, TFD_TIMER_ABSTIME, &spec, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        *armed = deadline;
        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            if let Some(timerfd) = self.timerfd {
                libc::close(timerfd);
            }
            libc::close(self.eventfd);
            libc::close(self.epoll);
        }
    }
}

/// Absolute `CLOCK_MONOTONIC` time `after` from now.
fn monotonic_after(after: Duration) -> io::Result<timespec> {
    let mut now = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(CLOCK_MONOTONIC, &mut now) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let nanos = now.tv_nsec as u64 + after.subsec_nanos() as u64;
    Ok(timespec {
        tv_sec: now.tv_sec + after.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as _,
    })
}

fn drain(fd: RawFd) {
    let mut buf = 0u64;
    unsafe {
        libc::read(fd, &mut buf as *mut u64 as *mut _, 8);
    }
}
