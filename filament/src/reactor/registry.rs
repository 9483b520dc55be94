//! Runtime-wide reactor state.
//!
//! The [`Registry`] is created by [`Runtime`](crate::Runtime) and handed to
//! every scheduler it starts. It owns the poll-descriptor arena and the
//! table of event loops, and it implements the two operations that span
//! loops: subscribing a descriptor (possibly moving it from a loop of
//! another context) and closing one.

use crate::config::Backend;
use crate::error::Result;
use crate::reactor::arena::{ArenaIndex, PollDescriptorArena};
use crate::reactor::driver::{DriverHandle, DriverId, EventLoopDriver};
use crate::reactor::poller::Poller;
use crate::reactor::poller::platform::sys_close;
use crate::runtime::executor::core::ContextId;

use log::debug;
use parking_lot::RwLock;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};

pub(crate) struct Registry {
    backend: Backend,
    arena: PollDescriptorArena,
    drivers: RwLock<Vec<Weak<DriverHandle>>>,
}

impl Registry {
    pub(crate) fn new(backend: Backend) -> Arc<Self> {
        Arc::new(Self {
            backend,
            arena: PollDescriptorArena::new(),
            drivers: RwLock::new(Vec::new()),
        })
    }

    pub(crate) fn backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn arena(&self) -> &PollDescriptorArena {
        &self.arena
    }

    /// Creates a new event loop bound to `context`.
    pub(crate) fn create_driver(self: &Arc<Self>, context: ContextId) -> io::Result<EventLoopDriver> {
        let poller = Poller::new(self.backend)?;

        let mut drivers = self.drivers.write();
        let id = DriverId(drivers.len());
        let handle = Arc::new(DriverHandle::new(id, context, poller));
        drivers.push(Arc::downgrade(&handle));

        debug!("event loop {id:?} created for context {context:?} ({:?})", self.backend);
        Ok(EventLoopDriver::new(handle, self.clone()))
    }

    pub(crate) fn driver(&self, id: DriverId) -> Option<Arc<DriverHandle>> {
        self.drivers.read().get(id.0).and_then(Weak::upgrade)
    }

    /// Makes sure `fd` is registered with an event loop that will wake
    /// fibers parked from `driver`.
    ///
    /// Loops of the same context share descriptors: wakeups travel through
    /// the waker, which requeues the fiber on its own context. A descriptor
    /// owned by a loop of another context is moved to `driver`, which
    /// fails with [`Error::Busy`](crate::Error::Busy) while fibers still
    /// wait on it there.
    ///
    /// Returns the slot index and the loop that owns the registration.
    pub(crate) fn subscribe(&self, fd: RawFd, driver: &Arc<DriverHandle>) -> Result<(ArenaIndex, Arc<DriverHandle>)> {
        let index = self.arena.acquire(fd)?;
        let token = index.to_token();

        loop {
            let (owner_id, claimed) = self.arena.claim(index, driver.id())?;

            if claimed {
                if let Err(err) = driver.poller.register(fd, token) {
                    let _ = self.arena.with(index, |pd| {
                        if pd.owner == Some(driver.id()) {
                            pd.owner = None;
                        }
                    });
                    return Err(err.into());
                }

                driver.subscribed();
                return Ok((index, driver.clone()));
            }

            if owner_id == driver.id() {
                return Ok((index, driver.clone()));
            }

            let owner = self.driver(owner_id);
            if let Some(owner) = &owner {
                if owner.context() == driver.context() {
                    return Ok((index, owner.clone()));
                }
            }

            if !self.arena.transfer(index, Some(owner_id), driver.id())? {
                continue;
            }

            if let Err(err) = driver.poller.register(fd, token) {
                let previous = owner.as_ref().map(|_| owner_id);
                let _ = self.arena.with(index, |pd| {
                    if pd.owner == Some(driver.id()) {
                        pd.owner = previous;
                    }
                });
                return Err(err.into());
            }
            driver.subscribed();

            if let Some(owner) = owner {
                owner.poller.deregister(fd);
                owner.unsubscribed();
            }

            debug!("fd {fd} moved from event loop {owner_id:?} to {:?}", driver.id());
            return Ok((index, driver.clone()));
        }
    }

    /// Releases `fd` from the arena and its event loop, closes it, then
    /// wakes anything still parked on it so the retry observes `EBADF`.
    pub(crate) fn close(&self, fd: RawFd) {
        let mut leftovers = Vec::new();

        if let Some(index) = self.arena.lookup(fd) {
            if let Ok(released) = self.arena.release(index) {
                if let Some(owner) = released.owner.and_then(|id| self.driver(id)) {
                    owner.poller.deregister(fd);
                    owner.unsubscribed();
                }
                leftovers = released.wakers;
            }
        }

        sys_close(fd);

        for waker in leftovers {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactor::poller::platform::sys_pipe;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Wake, Waker};

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Arc<Counter>, Waker) {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        (counter, waker)
    }

    #[test]
    fn subscribe_registers_once_per_context() {
        let registry = Registry::new(Backend::Poll);
        let context = ContextId::next();
        let first = registry.create_driver(context).unwrap();
        let second = registry.create_driver(context).unwrap();
        let (r, w) = sys_pipe().unwrap();

        let (index, owner) = registry.subscribe(r, first.handle()).unwrap();
        assert_eq!(owner.id(), first.handle().id());
        assert_eq!(first.handle().subscriptions(), 1);

        let (again, shared) = registry.subscribe(r, second.handle()).unwrap();
        assert_eq!(again, index);
        assert_eq!(shared.id(), first.handle().id());
        assert_eq!(second.handle().subscriptions(), 0);

        registry.close(r);
        sys_close(w);
        assert_eq!(first.handle().subscriptions(), 0);
    }

    #[test]
    fn transfer_across_contexts_requires_no_waiters() {
        let registry = Registry::new(Backend::Poll);
        let home = registry.create_driver(ContextId::next()).unwrap();
        let away = registry.create_driver(ContextId::next()).unwrap();
        let (r, w) = sys_pipe().unwrap();
        let (_, waker) = counter();

        let (index, _) = registry.subscribe(r, home.handle()).unwrap();
        registry.arena().readers(index, |l| l.park(1, &waker)).unwrap();

        let Err(err) = registry.subscribe(r, away.handle()) else {
            panic!("called `Result::unwrap_err()` on an `Ok` value");
        };
        assert!(matches!(err, Error::Busy { fd } if fd == r));

        registry.arena().readers(index, |l| l.remove(1)).unwrap();
        let (_, owner) = registry.subscribe(r, away.handle()).unwrap();
        assert_eq!(owner.id(), away.handle().id());
        assert_eq!(home.handle().subscriptions(), 0);
        assert_eq!(away.handle().subscriptions(), 1);

        registry.close(r);
        sys_close(w);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn failed_transfer_keeps_the_previous_owner() {
        use std::fs::File;
        use std::os::fd::AsRawFd;

        let registry = Registry::new(Backend::Epoll);
        let home = registry.create_driver(ContextId::next()).unwrap();
        let away = registry.create_driver(ContextId::next()).unwrap();

        // epoll refuses regular files, so registering with `away` fails.
        let path = std::env::temp_dir().join(format!("filament-registry-{}", std::process::id()));
        let file = File::create(&path).unwrap();
        let fd = file.as_raw_fd();

        let index = registry.arena().acquire(fd).unwrap();
        registry.arena().claim(index, home.handle().id()).unwrap();

        assert!(matches!(registry.subscribe(fd, away.handle()), Err(Error::Io(_))));
        assert_eq!(registry.arena().owner(index).unwrap(), Some(home.handle().id()));
        assert_eq!(away.handle().subscriptions(), 0);

        registry.arena().release(index).unwrap();
        drop(file);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn close_releases_slot_and_wakes_waiters() {
        let registry = Registry::new(Backend::Poll);
        let driver = registry.create_driver(ContextId::next()).unwrap();
        let (r, w) = sys_pipe().unwrap();
        let (counter, waker) = counter();

        let (index, _) = registry.subscribe(r, driver.handle()).unwrap();
        registry.arena().readers(index, |l| l.park(7, &waker)).unwrap();

        registry.close(r);
        sys_close(w);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(registry.arena().lookup(r).is_none());
        assert!(matches!(
            registry.arena().readers(index, |l| l.len()),
            Err(Error::Stale { .. })
        ));
    }
}
