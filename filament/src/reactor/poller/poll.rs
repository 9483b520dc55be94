//! Portable `poll(2)` backend.
//!
//! `poll` has no persistent kernel-side registration, so the interest set
//! lives here. Interest is one-shot: a direction is watched from the moment
//! a fiber parks on it until the first report, which emulates the
//! edge-triggered contract of the other backends. A self-pipe interrupts a
//! blocked wait, both for cross-thread wakeups and when a new interest is
//! armed while another thread is polling.

use super::common::{Interest, Wait};
use super::unix::{sys_close, sys_pipe, sys_read, sys_write};
use crate::reactor::event::{Event, push_event};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, pollfd};
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

struct Watch {
    token: u64,
    interest: Interest,
}

pub(crate) struct PollPoller {
    watches: Mutex<HashMap<RawFd, Watch>>,
    pipe_read: RawFd,
    pipe_write: RawFd,
    waiting: AtomicBool,
}

impl PollPoller {
    pub(crate) fn new() -> io::Result<Self> {
        let (pipe_read, pipe_write) = sys_pipe()?;

        Ok(Self {
            watches: Mutex::new(HashMap::new()),
            pipe_read,
            pipe_write,
            waiting: AtomicBool::new(false),
        })
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.watches.lock().insert(
            fd,
            Watch {
                token,
                interest: Interest {
                    read: false,
                    write: false,
                },
            },
        );
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        self.watches.lock().remove(&fd);
    }

    /// Watches `interest` on `fd` until the next report.
    pub(crate) fn arm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        {
            let mut watches = self.watches.lock();
            let watch = watches.entry(fd).or_insert(Watch {
                token,
                interest: Interest {
                    read: false,
                    write: false,
                },
            });
            watch.token = token;
            watch.interest.read |= interest.read;
            watch.interest.write |= interest.write;
        }

        if self.waiting.load(Ordering::SeqCst) {
            self.interrupt();
        }
        Ok(())
    }

    pub(crate) fn interrupt(&self) {
        if let Err(err) = sys_write(self.pipe_write, &[1]) {
            if err.kind() != io::ErrorKind::WouldBlock {
                trace!("poll: interrupt failed: {err}");
            }
        }
    }

    pub(crate) fn poll(&self, events: &mut Vec<Event>, wait: Wait) -> io::Result<()> {
        let mut fds = vec![pollfd {
            fd: self.pipe_read,
            events: POLLIN,
            revents: 0,
        }];

        // Published before the snapshot: an `arm` that misses the snapshot
        // is guaranteed to see it and interrupt.
        self.waiting.store(true, Ordering::SeqCst);
        {
            let watches = self.watches.lock();
            for (&fd, watch) in watches.iter() {
                let mut mask = 0;
                if watch.interest.read {
                    mask |= POLLIN;
                }
                if watch.interest.write {
                    mask |= POLLOUT;
                }
                if mask != 0 {
                    fds.push(pollfd {
                        fd,
                        events: mask,
                        revents: 0,
                    });
                }
            }
        }

        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as _, wait.as_millis()) };
        self.waiting.store(false, Ordering::SeqCst);

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        if fds[0].revents != 0 {
            let mut buf = [0u8; 64];
            while let Ok(n) = sys_read(self.pipe_read, &mut buf) {
                if n == 0 {
                    break;
                }
            }
        }

        let failed_mask = POLLHUP | POLLERR | POLLNVAL;
        let mut watches = self.watches.lock();

        for pfd in fds.iter().skip(1).filter(|p| p.revents != 0) {
            let Some(watch) = watches.get_mut(&pfd.fd) else {
                continue;
            };

            let failed = pfd.revents & failed_mask != 0;
            let readable = failed || pfd.revents & POLLIN != 0;
            let writable = failed || pfd.revents & POLLOUT != 0;

            if readable {
                watch.interest.read = false;
            }
            if writable {
                watch.interest.write = false;
            }

            push_event(
                events,
                Event {
                    token: watch.token,
                    readable,
                    writable,
                },
            );
        }

        Ok(())
    }
}

impl Drop for PollPoller {
    fn drop(&mut self) {
        sys_close(self.pipe_read);
        sys_close(self.pipe_write);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn interest_armed_during_a_wait_is_reported() {
        let poller = Arc::new(PollPoller::new().unwrap());
        let (r, w) = sys_pipe().unwrap();
        poller.register(r, 7).unwrap();

        let waiter = {
            let poller = poller.clone();
            thread::spawn(move || {
                let mut events = Vec::new();
                while !events.iter().any(|e: &Event| e.token == 7) {
                    poller.poll(&mut events, Wait::Forever).unwrap();
                }
                events
            })
        };

        thread::sleep(Duration::from_millis(20));
        poller.arm(r, 7, Interest::READ).unwrap();
        sys_write(w, b"x").unwrap();

        let events = waiter.join().unwrap();
        let event = events.iter().find(|e| e.token == 7).unwrap();
        assert!(event.readable);

        sys_close(r);
        sys_close(w);
    }

    #[test]
    fn reported_direction_is_disarmed() {
        let poller = PollPoller::new().unwrap();
        let (r, w) = sys_pipe().unwrap();
        poller.register(r, 3).unwrap();
        poller.arm(r, 3, Interest::READ).unwrap();
        sys_write(w, b"x").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Wait::Immediate).unwrap();
        assert_eq!(events.len(), 1);

        // Still readable, but nobody asked again.
        events.clear();
        poller.poll(&mut events, Wait::Immediate).unwrap();
        assert!(events.is_empty());

        sys_close(r);
        sys_close(w);
    }
}
