//! BSD/macOS `kqueue` backend.
//!
//! Each descriptor gets a read and a write filter added once with
//! `EV_CLEAR` (edge semantics). Deadlines are a one-shot `EVFILT_TIMER`
//! in nanoseconds; interrupts go through an `EVFILT_USER` event.

use super::common::{Interest, TIMER_TOKEN, WAKE_TOKEN, Wait};
use crate::reactor::event::{Event, push_event};

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_EOF, EV_ERROR, EV_ONESHOT, EVFILT_READ, EVFILT_TIMER,
    EVFILT_USER, EVFILT_WRITE, NOTE_NSECONDS, NOTE_TRIGGER, c_void, kevent, timespec,
};
use log::trace;
use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::time::Instant;
use std::{io, mem, ptr};

const USER_IDENT: usize = 0;
const TIMER_IDENT: usize = 1;

pub(crate) struct KqueuePoller {
    kq: RawFd,
    timer_armed: Mutex<bool>,
    buffer: Mutex<Vec<kevent>>,
}

unsafe impl Send for KqueuePoller {}
unsafe impl Sync for KqueuePoller {}

fn change(ident: usize, filter: i16, flags: u16, fflags: u32, data: i64, token: u64) -> kevent {
    let mut ev: kevent = unsafe { mem::zeroed() };
    ev.ident = ident as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.fflags = fflags as _;
    ev.data = data as _;
    ev.udata = token as usize as *mut c_void;
    ev
}

impl KqueuePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC) };

        let poller = Self {
            kq,
            timer_armed: Mutex::new(false),
            buffer: Mutex::new(Vec::with_capacity(256)),
        };

        poller.submit(&[change(
            USER_IDENT,
            EVFILT_USER,
            EV_ADD | EV_CLEAR,
            0,
            0,
            WAKE_TOKEN,
        )])?;

        Ok(poller)
    }

    fn submit(&self, changes: &[kevent]) -> io::Result<()> {
        let rc = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as _,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let ident = fd as usize;
        self.submit(&[
            change(ident, EVFILT_READ, EV_ADD | EV_CLEAR, 0, 0, token),
            change(ident, EVFILT_WRITE, EV_ADD | EV_CLEAR, 0, 0, token),
        ])
    }

    pub(crate) fn deregister(&self, fd: RawFd) {
        let ident = fd as usize;
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            if let Err(err) = self.submit(&[change(ident, filter, EV_DELETE, 0, 0, 0)]) {
                trace!("kqueue: deregister fd {fd}: {err}");
            }
        }
    }

    /// `EV_CLEAR` filters stay armed between waits.
    pub(crate) fn arm(&self, _fd: RawFd, _token: u64, _interest: Interest) -> io::Result<()> {
        Ok(())
    }

    pub(crate) fn interrupt(&self) {
        let _ = self.submit(&[change(USER_IDENT, EVFILT_USER, 0, NOTE_TRIGGER, 0, WAKE_TOKEN)]);
    }

    pub(crate) fn poll(&self, events: &mut Vec<Event>, wait: Wait) -> io::Result<()> {
        let mut changes = Vec::with_capacity(1);
        let mut timeout = None;

        {
            let mut armed = self.timer_armed.lock();
            match wait {
                Wait::Immediate => {
                    timeout = Some(timespec {
                        tv_sec: 0,
                        tv_nsec: 0,
                    });
                }
                Wait::Until(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    let nanos = left.as_nanos().clamp(1, i64::MAX as u128) as i64;
                    changes.push(change(
                        TIMER_IDENT,
                        EVFILT_TIMER,
                        EV_ADD | EV_ONESHOT,
                        NOTE_NSECONDS,
                        nanos,
                        TIMER_TOKEN,
                    ));
                    *armed = true;
                }
                Wait::Forever if *armed => {
                    changes.push(change(TIMER_IDENT, EVFILT_TIMER, EV_DELETE, 0, 0, TIMER_TOKEN));
                    *armed = false;
                }
                Wait::Forever => {}
            }
        }

        let mut buffer = self.buffer.lock();
        buffer.clear();

        let n = unsafe {
            libc::kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as _,
                buffer.as_mut_ptr(),
                buffer.capacity() as _,
                timeout.as_ref().map_or(ptr::null(), |t| t as *const timespec),
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
            let token = ev.udata as usize as u64;
            let failed = ev.flags & (EV_EOF | EV_ERROR) != 0;

            match ev.filter {
                EVFILT_USER => {}
                EVFILT_TIMER => *self.timer_armed.lock() = false,
                EVFILT_READ => push_event(
                    events,
                    Event {
                        token,
                        readable: true,
                        writable: failed,
                    },
                ),
                EVFILT_WRITE => push_event(
                    events,
                    Event {
                        token,
                        readable: failed,
                        writable: true,
                    },
                ),
                _ => {}
            }
        }

        Ok(())
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}
