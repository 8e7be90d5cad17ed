// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parking of threads that block on the outcome of a task.

use crate::loom::thread::{self, Thread};
use alloc::sync::Arc;
use core::task::{RawWaker, RawWakerVTable, Waker};
use core::time::Duration;
use static_assertions::assert_impl_all;

/// Parks the thread it was created on until it is unparked, usually through the [`Waker`]
/// returned by [`Parker::into_waker`].
///
/// This is what lets code *outside* of the cooperative task world block on something that lives
/// inside it: a result receiver registers the parker's waker with its completion signal and parks
/// until the signal wakes it.
#[derive(Debug, Clone)]
pub struct Parker(Arc<Thread>);
assert_impl_all!(Parker: Send, Sync);

impl Parker {
    /// Returns a parker for the calling thread.
    pub fn for_current() -> Self {
        Self(Arc::new(thread::current()))
    }

    /// Blocks the calling thread until the parker is unparked.
    ///
    /// Like [`std::thread::park`], this may return spuriously, callers must re-check whatever
    /// condition they are waiting for.
    #[inline]
    pub fn park(&self) {
        tracing::trace!("parking current thread ({:?})...", self.0);
        thread::park();
    }

    /// Blocks the calling thread until the parker is unparked or `timeout` elapses.
    #[cfg(not(loom))]
    #[inline]
    pub fn park_timeout(&self, timeout: Duration) {
        tracing::trace!(?timeout, "parking current thread ({:?})...", self.0);
        thread::park_timeout(timeout);
    }

    /// Loom can't model timeouts, this always panics.
    #[cfg(loom)]
    pub fn park_timeout(&self, _timeout: Duration) {
        unreachable!("loom doesn't support `park_timeout`");
    }

    /// Wakes the parked thread, or makes its next `park` return right away.
    #[inline]
    pub fn unpark(&self) {
        tracing::trace!("unparking thread {:?}...", self.0);
        self.0.unpark();
    }

    /// Converts the parker into a [`Waker`] that unparks the parked thread when woken.
    #[inline]
    pub fn into_waker(self) -> Waker {
        // Safety: the vtable functions uphold the `RawWaker` contract, they treat the data pointer
        // as an `Arc<Thread>`.
        unsafe { Waker::from_raw(Self::raw_waker(self.0)) }
    }

    const WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(
        Self::waker_clone,
        Self::waker_wake,
        Self::waker_wake_by_ref,
        Self::waker_drop,
    );

    unsafe fn waker_clone(raw: *const ()) -> RawWaker {
        // Safety: `raw` came out of `Arc::into_raw` in `raw_waker`
        unsafe {
            Arc::increment_strong_count(raw.cast::<Thread>());
            Self::raw_waker(Arc::from_raw(raw.cast::<Thread>()))
        }
    }

    unsafe fn waker_wake(raw: *const ()) {
        // Safety: `raw` came out of `Arc::into_raw` in `raw_waker`, waking by value consumes the
        // reference
        let thread = unsafe { Arc::from_raw(raw.cast::<Thread>()) };
        thread.unpark();
    }

    unsafe fn waker_wake_by_ref(raw: *const ()) {
        // Safety: `raw` came out of `Arc::into_raw` in `raw_waker` and is still alive
        let thread = unsafe { &*raw.cast::<Thread>() };
        thread.unpark();
    }

    unsafe fn waker_drop(raw: *const ()) {
        // Safety: `raw` came out of `Arc::into_raw` in `raw_waker`
        drop(unsafe { Arc::from_raw(raw.cast::<Thread>()) });
    }

    // `inline(never)` keeps a single copy of `WAKER_VTABLE` so that `Waker::will_wake` (which
    // compares vtable pointers) recognizes clones of the same waker. Completion signals rely on it
    // to skip re-registering the same blocked thread.
    #[inline(never)]
    fn raw_waker(thread: Arc<Thread>) -> RawWaker {
        RawWaker::new(Arc::into_raw(thread).cast::<()>(), &Self::WAKER_VTABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::sync::atomic::{AtomicBool, Ordering};
    use crate::loom::sync::{Arc, mpsc};

    #[test]
    fn waker_unparks_thread() {
        crate::loom::model(|| {
            let unparked = Arc::new(AtomicBool::new(false));
            let (tx, rx) = mpsc::channel();

            // Thread A parks itself until the waker it handed out is woken
            let a = thread::spawn({
                let unparked = unparked.clone();
                move || {
                    let parker = Parker::for_current();
                    tx.send(parker.clone().into_waker()).unwrap();

                    while !unparked.load(Ordering::Acquire) {
                        parker.park();
                    }
                }
            });

            // Thread B flips the flag and wakes thread A
            let b = thread::spawn(move || {
                let waker = rx.recv().unwrap();
                unparked.store(true, Ordering::Release);
                waker.wake();
            });

            a.join().unwrap();
            b.join().unwrap();
        });
    }

    #[cfg(not(loom))]
    #[test]
    fn unpark_before_park() {
        let parker = Parker::for_current();
        parker.unpark();
        // the token left by `unpark` makes this return immediately
        parker.park();
    }

    #[cfg(not(loom))]
    #[test]
    fn cloned_waker_will_wake() {
        let waker = Parker::for_current().into_waker();
        let clone = waker.clone();
        assert!(waker.will_wake(&clone));
    }
}
