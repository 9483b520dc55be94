use crate::error::Error;
use crate::reactor::arena::{ArenaIndex, WaiterList};
use crate::reactor::poller::common::Interest;
use crate::reactor::poller::platform::sys_close;
use crate::reactor::registry::Registry;
use crate::runtime::context;

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};

static NEXT_WAITER: AtomicU64 = AtomicU64::new(0);

/// One direction of readiness waiting on one descriptor.
///
/// Each I/O future owns one. After its syscall reports `EAGAIN` the future
/// calls [`park`](Self::park), which subscribes the descriptor with the
/// current scheduler's event loop and lists the fiber in the matching
/// wait list. Dropping the `IoWait` unlists it.
pub(crate) struct IoWait {
    fd: RawFd,
    interest: Interest,
    id: u64,
    parked: Option<(Weak<Registry>, ArenaIndex)>,
}

impl IoWait {
    pub(crate) fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            id: NEXT_WAITER.fetch_add(1, Ordering::Relaxed),
            parked: None,
        }
    }

    /// Parks the current fiber until the descriptor is ready again.
    ///
    /// Returns `Ok(false)` when a readiness edge arrived since the last
    /// attempt: nothing was parked and the syscall should be retried.
    pub(crate) fn park(&mut self, cx: &mut Context<'_>) -> io::Result<bool> {
        let local = context::scheduler().ok_or(Error::OutsideRuntime)?;
        let registry = &local.registry;

        let (index, owner) = registry.subscribe(self.fd, local.shared.driver())?;

        let id = self.id;
        let park = |list: &mut WaiterList| list.park(id, cx.waker());
        let parked = if self.interest.read {
            registry.arena().readers(index, park)?
        } else {
            registry.arena().writers(index, park)?
        };

        if parked {
            owner.poller.arm(self.fd, index.to_token(), self.interest)?;
            self.parked = Some((Arc::downgrade(registry), index));
        }

        Ok(parked)
    }

    /// Runs `op` until it completes, fails, or has to wait for readiness.
    pub(crate) fn poll_with<T>(
        &mut self,
        cx: &mut Context<'_>,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> Poll<io::Result<T>> {
        loop {
            match op() {
                Ok(value) => {
                    self.unpark();
                    return Poll::Ready(Ok(value));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => match self.park(cx) {
                    Ok(true) => return Poll::Pending,
                    Ok(false) => continue,
                    Err(err) => return Poll::Ready(Err(err)),
                },
                Err(err) => {
                    self.unpark();
                    return Poll::Ready(Err(err));
                }
            }
        }
    }

    fn unpark(&mut self) {
        let Some((registry, index)) = self.parked.take() else {
            return;
        };
        let Some(registry) = registry.upgrade() else {
            return;
        };

        let id = self.id;
        let unlist = |list: &mut WaiterList| list.remove(id);
        // A stale index means the descriptor was closed; nothing to unlist.
        let _ = if self.interest.read {
            registry.arena().readers(index, unlist)
        } else {
            registry.arena().writers(index, unlist)
        };
    }
}

impl Drop for IoWait {
    fn drop(&mut self) {
        self.unpark();
    }
}

/// An owned descriptor that remembers which runtime has seen it.
///
/// Closing must go through the [`Registry`] that subscribed the descriptor
/// so its slot is released before the number can be reused. The registry
/// is recorded the first time the owner touches the descriptor from a
/// scheduler thread.
pub(crate) struct Descriptor {
    fd: RawFd,
    registry: OnceLock<Weak<Registry>>,
}

impl Descriptor {
    pub(crate) fn new(fd: RawFd) -> Self {
        let descriptor = Self {
            fd,
            registry: OnceLock::new(),
        };
        descriptor.track();
        descriptor
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Records the current runtime, if any, and returns the descriptor.
    pub(crate) fn track(&self) -> RawFd {
        if self.registry.get().is_none() {
            if let Some(local) = context::scheduler() {
                let _ = self.registry.set(Arc::downgrade(&local.registry));
            }
        }
        self.fd
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        match self.registry.get().and_then(Weak::upgrade) {
            Some(registry) => registry.close(self.fd),
            None => close(self.fd),
        }
    }
}

/// Closes `fd`, releasing its slot in the current runtime first.
pub(crate) fn close(fd: RawFd) {
    match context::scheduler() {
        Some(local) => local.registry.close(fd),
        None => sys_close(fd),
    }
}
