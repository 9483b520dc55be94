//! Poll-descriptor arena.
//!
//! One slot per file-descriptor number, shared by every event loop of a
//! runtime. A slot records which event loop has the descriptor registered
//! and which fibers wait on each direction. Slots are addressed through an
//! [`ArenaIndex`] carrying a generation; releasing a slot bumps it, so an
//! index captured before a close (and a kernel event still in flight for
//! it) is rejected as stale instead of reaching whatever reuses the number.
//!
//! Each slot has its own lock. The outer table lock is only written when
//! the table grows.

use crate::error::{Error, Result};
use crate::reactor::driver::DriverId;

use parking_lot::RwLock;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::task::Waker;

/// Generational reference to a slot, packed into the poller token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ArenaIndex {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl ArenaIndex {
    pub(crate) fn to_token(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    pub(crate) fn from_token(token: u64) -> Self {
        Self {
            slot: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

struct Waiter {
    id: u64,
    waker: Waker,
}

/// Fibers parked on one direction of a descriptor.
///
/// With edge-triggered registrations a readiness edge that arrives while
/// nobody waits would otherwise be lost, so it is remembered in `ready`
/// and consumed by the next fiber that tries to park.
#[derive(Default)]
pub(crate) struct WaiterList {
    waiters: Vec<Waiter>,
    ready: bool,
}

impl WaiterList {
    /// Parks waiter `id`, or refreshes its waker if it is already parked.
    ///
    /// Returns `false` without parking when an unconsumed edge is pending;
    /// the caller must retry its syscall.
    pub(crate) fn park(&mut self, id: u64, waker: &Waker) -> bool {
        if let Some(waiter) = self.waiters.iter_mut().find(|w| w.id == id) {
            if !waiter.waker.will_wake(waker) {
                waiter.waker = waker.clone();
            }
            return true;
        }

        if std::mem::take(&mut self.ready) {
            return false;
        }

        self.waiters.push(Waiter {
            id,
            waker: waker.clone(),
        });
        true
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.waiters.retain(|w| w.id != id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Moves every waiter's waker into `out`, or records the edge when
    /// nobody is parked.
    pub(crate) fn ready(&mut self, out: &mut Vec<Waker>) {
        if self.waiters.is_empty() {
            self.ready = true;
        } else {
            out.extend(self.waiters.drain(..).map(|w| w.waker));
        }
    }

    fn take_all(&mut self, out: &mut Vec<Waker>) {
        self.ready = false;
        out.extend(self.waiters.drain(..).map(|w| w.waker));
    }
}

/// Per-descriptor state guarded by the slot lock.
pub(crate) struct PollDescriptor {
    generation: u32,
    allocated: bool,
    pub(crate) fd: RawFd,
    pub(crate) owner: Option<DriverId>,
    pub(crate) readers: WaiterList,
    pub(crate) writers: WaiterList,
}

impl PollDescriptor {
    fn vacant() -> Self {
        Self {
            generation: 0,
            allocated: false,
            fd: -1,
            owner: None,
            readers: WaiterList::default(),
            writers: WaiterList::default(),
        }
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.readers.is_empty() || !self.writers.is_empty()
    }
}

/// What was left in a slot when it was released.
pub(crate) struct Released {
    pub(crate) owner: Option<DriverId>,
    pub(crate) wakers: Vec<Waker>,
}

pub(crate) struct PollDescriptorArena {
    slots: RwLock<Vec<Arc<RwLock<PollDescriptor>>>>,
}

impl PollDescriptorArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    fn slot(&self, slot: u32) -> Option<Arc<RwLock<PollDescriptor>>> {
        self.slots.read().get(slot as usize).cloned()
    }

    fn slot_or_grow(&self, slot: u32) -> Arc<RwLock<PollDescriptor>> {
        if let Some(existing) = self.slot(slot) {
            return existing;
        }

        let mut slots = self.slots.write();
        let wanted = slot as usize + 1;
        if slots.len() < wanted {
            let target = wanted.max(slots.len() * 2).max(64);
            slots.resize_with(target, || Arc::new(RwLock::new(PollDescriptor::vacant())));
        }
        slots[slot as usize].clone()
    }

    /// Returns the live index for `fd`, allocating its slot on first use.
    pub(crate) fn acquire(&self, fd: RawFd) -> Result<ArenaIndex> {
        let slot = u32::try_from(fd).map_err(|_| {
            Error::Io(std::io::Error::from_raw_os_error(libc::EBADF))
        })?;

        let cell = self.slot_or_grow(slot);
        let mut pd = cell.write();
        if !pd.allocated {
            pd.allocated = true;
            pd.fd = fd;
            pd.owner = None;
        }

        Ok(ArenaIndex {
            slot,
            generation: pd.generation,
        })
    }

    /// The live index for `fd`, if its slot is allocated.
    pub(crate) fn lookup(&self, fd: RawFd) -> Option<ArenaIndex> {
        let slot = u32::try_from(fd).ok()?;
        let cell = self.slot(slot)?;
        let pd = cell.read();

        pd.allocated.then_some(ArenaIndex {
            slot,
            generation: pd.generation,
        })
    }

    /// Runs `f` on the descriptor behind `index` under the slot lock.
    pub(crate) fn with<R>(&self, index: ArenaIndex, f: impl FnOnce(&mut PollDescriptor) -> R) -> Result<R> {
        let stale = || Error::Stale {
            slot: index.slot,
            generation: index.generation,
        };

        let cell = self.slot(index.slot).ok_or_else(stale)?;
        let mut pd = cell.write();
        if !pd.allocated || pd.generation != index.generation {
            return Err(stale());
        }

        Ok(f(&mut pd))
    }

    pub(crate) fn readers<R>(&self, index: ArenaIndex, f: impl FnOnce(&mut WaiterList) -> R) -> Result<R> {
        self.with(index, |pd| f(&mut pd.readers))
    }

    pub(crate) fn writers<R>(&self, index: ArenaIndex, f: impl FnOnce(&mut WaiterList) -> R) -> Result<R> {
        self.with(index, |pd| f(&mut pd.writers))
    }

    pub(crate) fn owner(&self, index: ArenaIndex) -> Result<Option<DriverId>> {
        self.with(index, |pd| pd.owner)
    }

    /// Sets the owner if the slot has none. Returns the owner in effect.
    pub(crate) fn claim(&self, index: ArenaIndex, driver: DriverId) -> Result<(DriverId, bool)> {
        self.with(index, |pd| match pd.owner {
            Some(owner) => (owner, false),
            None => {
                pd.owner = Some(driver);
                (driver, true)
            }
        })
    }

    /// Moves the descriptor from `from` to `to`.
    ///
    /// Fails with [`Error::Busy`] while fibers are parked on it, since their
    /// wakeups are routed through `from`'s event loop.
    pub(crate) fn transfer(&self, index: ArenaIndex, from: Option<DriverId>, to: DriverId) -> Result<bool> {
        self.with(index, |pd| {
            if pd.owner != from {
                return Ok(false);
            }
            if pd.has_waiters() {
                return Err(Error::Busy { fd: pd.fd });
            }
            pd.owner = Some(to);
            Ok(true)
        })?
    }

    /// Hands readiness for `index` to its waiters.
    pub(crate) fn ready(&self, index: ArenaIndex, readable: bool, writable: bool) -> Result<Vec<Waker>> {
        self.with(index, |pd| {
            let mut wakers = Vec::new();
            if readable {
                pd.readers.ready(&mut wakers);
            }
            if writable {
                pd.writers.ready(&mut wakers);
            }
            wakers
        })
    }

    /// Frees the slot behind `index`. Every outstanding index for it
    /// becomes stale.
    pub(crate) fn release(&self, index: ArenaIndex) -> Result<Released> {
        self.with(index, |pd| {
            let mut wakers = Vec::new();
            pd.readers.take_all(&mut wakers);
            pd.writers.take_all(&mut wakers);

            pd.allocated = false;
            pd.generation = pd.generation.wrapping_add(1);
            pd.fd = -1;

            Released {
                owner: pd.owner.take(),
                wakers,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> (Arc<Counter>, Waker) {
        let c = Arc::new(Counter(AtomicUsize::new(0)));
        (c.clone(), Waker::from(c))
    }

    #[test]
    fn token_round_trips_index() {
        let index = ArenaIndex {
            slot: 42,
            generation: 7,
        };
        assert_eq!(ArenaIndex::from_token(index.to_token()), index);
    }

    #[test]
    fn acquire_is_idempotent_until_release() {
        let arena = PollDescriptorArena::new();
        let a = arena.acquire(5).unwrap();
        let b = arena.acquire(5).unwrap();
        assert_eq!(a, b);
        assert_eq!(arena.lookup(5), Some(a));

        arena.release(a).unwrap();
        assert_eq!(arena.lookup(5), None);

        let c = arena.acquire(5).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn stale_index_is_rejected() {
        let arena = PollDescriptorArena::new();
        let old = arena.acquire(3).unwrap();
        arena.release(old).unwrap();
        arena.acquire(3).unwrap();

        assert!(matches!(arena.ready(old, true, true), Err(Error::Stale { slot: 3, .. })));
        assert!(matches!(arena.release(old), Err(Error::Stale { .. })));
        assert!(matches!(arena.owner(old), Err(Error::Stale { .. })));
    }

    #[test]
    fn negative_fd_is_rejected() {
        let arena = PollDescriptorArena::new();
        assert!(arena.acquire(-1).is_err());
        assert_eq!(arena.lookup(-1), None);
    }

    #[test]
    fn readiness_wakes_parked_waiters() {
        let arena = PollDescriptorArena::new();
        let index = arena.acquire(9).unwrap();
        let (count, waker) = counter();

        assert!(arena.readers(index, |r| r.park(1, &waker)).unwrap());
        assert!(arena.readers(index, |r| r.park(2, &waker)).unwrap());
        assert_eq!(arena.readers(index, |r| r.len()).unwrap(), 2);

        for w in arena.ready(index, true, false).unwrap() {
            w.wake();
        }
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
        assert!(arena.readers(index, |r| r.is_empty()).unwrap());
    }

    #[test]
    fn edge_without_waiters_is_remembered_once() {
        let arena = PollDescriptorArena::new();
        let index = arena.acquire(4).unwrap();
        let (_, waker) = counter();

        assert!(arena.ready(index, false, true).unwrap().is_empty());
        assert!(!arena.writers(index, |w| w.park(1, &waker)).unwrap());
        assert!(arena.writers(index, |w| w.park(1, &waker)).unwrap());
    }

    #[test]
    fn transfer_refuses_while_waiters_are_parked() {
        let arena = PollDescriptorArena::new();
        let index = arena.acquire(11).unwrap();
        let (_, waker) = counter();

        assert_eq!(arena.claim(index, DriverId(0)).unwrap(), (DriverId(0), true));
        assert_eq!(arena.claim(index, DriverId(1)).unwrap(), (DriverId(0), false));

        arena.readers(index, |r| r.park(1, &waker)).unwrap();
        assert!(matches!(
            arena.transfer(index, Some(DriverId(0)), DriverId(1)),
            Err(Error::Busy { fd: 11 })
        ));

        arena.readers(index, |r| r.remove(1)).unwrap();
        assert!(arena.transfer(index, Some(DriverId(0)), DriverId(1)).unwrap());
        assert_eq!(arena.owner(index).unwrap(), Some(DriverId(1)));
    }

    #[test]
    fn release_returns_owner_and_leftover_waiters() {
        let arena = PollDescriptorArena::new();
        let index = arena.acquire(6).unwrap();
        let (count, waker) = counter();

        arena.claim(index, DriverId(2)).unwrap();
        arena.readers(index, |r| r.park(1, &waker)).unwrap();
        arena.writers(index, |w| w.park(2, &waker)).unwrap();

        let released = arena.release(index).unwrap();
        assert_eq!(released.owner, Some(DriverId(2)));
        for w in released.wakers {
            w.wake();
        }
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
    }
}
