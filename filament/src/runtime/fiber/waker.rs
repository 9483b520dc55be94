use super::core::Fiber;

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::task::{RawWaker, RawWakerVTable, Waker};

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// Creates a [`Waker`] that resumes `fiber` on its execution context.
///
/// The data pointer is an `Arc<Fiber>` leaked with `Arc::into_raw`; every
/// vtable entry keeps that reference count balanced.
pub(crate) fn fiber_waker(fiber: Arc<Fiber>) -> Waker {
    unsafe { Waker::from_raw(RawWaker::new(Arc::into_raw(fiber) as *const (), &VTABLE)) }
}

fn clone_raw(ptr: *const ()) -> RawWaker {
    let fiber = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const Fiber) });
    let cloned: Arc<Fiber> = Arc::clone(&fiber);

    RawWaker::new(Arc::into_raw(cloned) as *const (), &VTABLE)
}

fn wake_raw(ptr: *const ()) {
    let fiber = unsafe { Arc::from_raw(ptr as *const Fiber) };
    fiber.wake();
}

fn wake_by_ref_raw(ptr: *const ()) {
    let fiber = ManuallyDrop::new(unsafe { Arc::from_raw(ptr as *const Fiber) });
    Arc::clone(&fiber).wake();
}

fn drop_raw(ptr: *const ()) {
    drop(unsafe { Arc::from_raw(ptr as *const Fiber) });
}
