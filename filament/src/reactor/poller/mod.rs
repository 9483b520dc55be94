//! Readiness multiplexers.
//!
//! One [`Poller`] backs each event loop. The backend is chosen once per
//! runtime from [`Backend`]: `epoll` on Linux, `kqueue` on the BSDs and
//! macOS, and plain `poll(2)` everywhere as a fallback.
//!
//! Every method takes `&self`. The owning scheduler thread is the only
//! caller of [`Poller::poll`]; other threads register, deregister and
//! interrupt concurrently.

pub(crate) mod common;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
mod kqueue;

mod poll;

pub(crate) mod unix;

pub(crate) use unix as platform;

use crate::config::Backend;
use crate::reactor::event::Event;
use common::{Interest, Wait};

use std::io;
use std::os::fd::RawFd;

pub(crate) enum Poller {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Epoll(epoll::EpollPoller),
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    Kqueue(kqueue::KqueuePoller),
    Poll(poll::PollPoller),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Poller::Epoll($p) => $body,
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            Poller::Kqueue($p) => $body,
            Poller::Poll($p) => $body,
        }
    };
}

impl Poller {
    pub(crate) fn new(backend: Backend) -> io::Result<Self> {
        match backend {
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Backend::Epoll => Ok(Poller::Epoll(epoll::EpollPoller::new()?)),
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            Backend::Kqueue => Ok(Poller::Kqueue(kqueue::KqueuePoller::new()?)),
            Backend::Poll => Ok(Poller::Poll(poll::PollPoller::new()?)),
            #[allow(unreachable_patterns)]
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{other:?} poller is not available on this platform"),
            )),
        }
    }

    /// Starts watching `fd` under `token` until [`deregister`](Self::deregister).
    pub(crate) fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        dispatch!(self, p => p.register(fd, token))
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        dispatch!(self, p => p.deregister(fd))
    }

    /// Declares that a fiber now waits for `interest` on `fd`.
    pub(crate) fn arm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        dispatch!(self, p => p.arm(fd, token, interest))
    }

    /// Makes a concurrent or the next [`poll`](Self::poll) return early.
    pub(crate) fn interrupt(&self) {
        dispatch!(self, p => p.interrupt())
    }

    /// Appends ready descriptors to `events`. Interrupt and timer wakeups
    /// are consumed here and never surface as events.
    pub(crate) fn poll(&self, events: &mut Vec<Event>, wait: Wait) -> io::Result<()> {
        dispatch!(self, p => p.poll(events, wait))
    }
}
