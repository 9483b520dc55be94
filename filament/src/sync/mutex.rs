use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// An asynchronous mutex with FIFO hand-off.
///
/// A fiber that cannot take the lock is suspended instead of blocking its
/// scheduler thread. Unlocking with waiters queued passes ownership
/// straight to the oldest one, so a fiber that keeps relocking cannot
/// starve the queue.
pub struct Mutex<T: ?Sized> {
    state: parking_lot::Mutex<State>,
    data: UnsafeCell<T>,
}

#[derive(Default)]
struct State {
    locked: bool,
    next_id: u64,
    queue: VecDeque<(u64, Waker)>,
    /// Waiter that was handed the lock but has not been polled since.
    handoff: Option<u64>,
}

// Safety: access to `data` is serialized by `state`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// Safety: only one guard exists at a time, and it requires `T: Send` to be
// used from another thread.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Self {
            state: parking_lot::Mutex::new(State::default()),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Suspends until the lock is held.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut guard = mutex.lock().await;
    /// *guard += 1;
    /// ```
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            id: None,
        }
    }

    /// Takes the lock if it is free and nobody is queued for it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }

        state.locked = true;
        Some(MutexGuard { mutex: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn unlock(&self) {
        let next = {
            let mut state = self.state.lock();
            match state.queue.pop_front() {
                Some((id, waker)) => {
                    state.handoff = Some(id);
                    Some(waker)
                }
                None => {
                    state.locked = false;
                    None
                }
            }
        };

        if let Some(waker) = next {
            waker.wake();
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("locked", &state.locked)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Future returned by [`Mutex::lock`].
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    id: Option<u64>,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mutex = self.mutex;
        let mut state = mutex.state.lock();

        match self.id {
            None => {
                if !state.locked {
                    state.locked = true;
                    return Poll::Ready(MutexGuard { mutex });
                }

                let id = state.next_id;
                state.next_id += 1;
                state.queue.push_back((id, cx.waker().clone()));
                self.id = Some(id);
                Poll::Pending
            }
            Some(id) if state.handoff == Some(id) => {
                state.handoff = None;
                drop(state);
                self.id = None;
                Poll::Ready(MutexGuard { mutex })
            }
            Some(id) => {
                if let Some((_, waker)) = state.queue.iter_mut().find(|(queued, _)| *queued == id) {
                    if !waker.will_wake(cx.waker()) {
                        *waker = cx.waker().clone();
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        let Some(id) = self.id else {
            return;
        };

        let mut state = self.mutex.state.lock();
        if state.handoff == Some(id) {
            // Handed the lock but never took it: pass it on.
            state.handoff = None;
            drop(state);
            self.mutex.unlock();
        } else {
            state.queue.retain(|(queued, _)| *queued != id);
        }
    }
}

/// Releases the lock when dropped.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

// Safety: a shared guard only hands out `&T`.
unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the guard proves exclusive ownership of the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: the guard proves exclusive ownership of the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<F: Future + Unpin>(future: &mut F, waker: &Waker) -> Poll<F::Output> {
        let mut cx = Context::from_waker(waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn uncontended_lock_is_immediate() {
        let mutex = Mutex::new(1);
        let waker = Waker::from(Arc::new(Counter(AtomicUsize::new(0))));

        let mut lock = mutex.lock();
        let Poll::Ready(mut guard) = poll_once(&mut lock, &waker) else {
            panic!("lock should be free");
        };
        *guard += 1;
        drop(guard);
        drop(lock);

        assert_eq!(mutex.into_inner(), 2);
    }

    #[test]
    fn waiters_are_served_in_order() {
        let mutex = Mutex::new(Vec::new());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());

        let held = mutex.try_lock().unwrap();
        let mut first = mutex.lock();
        let mut second = mutex.lock();
        assert!(poll_once(&mut second, &waker).is_pending());
        assert!(poll_once(&mut first, &waker).is_pending());

        drop(held);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        // The lock now belongs to `second`; newcomers cannot barge in.
        assert!(mutex.try_lock().is_none());
        assert!(poll_once(&mut first, &waker).is_pending());

        let Poll::Ready(mut guard) = poll_once(&mut second, &waker) else {
            panic!("second waiter was handed the lock");
        };
        guard.push(2);
        drop(guard);

        let Poll::Ready(mut guard) = poll_once(&mut first, &waker) else {
            panic!("first waiter was handed the lock");
        };
        guard.push(1);
        drop(guard);
        drop(first);
        drop(second);

        assert_eq!(mutex.into_inner(), vec![2, 1]);
    }

    #[test]
    fn dropping_a_handed_off_waiter_passes_the_lock_on() {
        let mutex = Mutex::new(());
        let waker = Waker::from(Arc::new(Counter(AtomicUsize::new(0))));

        let held = mutex.try_lock().unwrap();
        let mut first = mutex.lock();
        let mut second = mutex.lock();
        assert!(poll_once(&mut first, &waker).is_pending());
        assert!(poll_once(&mut second, &waker).is_pending());

        drop(held);
        drop(first);

        assert!(poll_once(&mut second, &waker).is_ready());
    }
}
