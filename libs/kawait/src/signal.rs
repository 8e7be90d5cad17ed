// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::fault::Fault;
use crate::loom::cell::UnsafeCell;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use bitflags::bitflags;
use core::fmt;
use core::panic::{RefUnwindSafe, UnwindSafe};
use core::task::Waker;
use static_assertions::const_assert_eq;

/// The untyped half of a completion signal: readiness, the captured waiter and the captured
/// fault.
///
/// A `RawSignal` goes through exactly one completion cycle. It starts out *not ready*, a single
/// producer then stores an outcome (the typed layer stores values, [`fail`][Self::fail] stores a
/// fault) and marks it ready, after which a single consumer takes the outcome out.
///
/// Registering a waiter and completing the signal may race (the producer may live on another
/// thread). Both sides go through one atomic state word:
///
/// - The consumer sets `REGISTERING` while it writes the waiter slot, then atomically swaps it for
///   `WAITING`. If the signal became `READY` in the meantime the consumer backs out and does not
///   suspend.
/// - The producer stores the outcome *before* setting `READY`. If the state it replaced had
///   `WAITING` but not `REGISTERING` the producer owns the waiter slot and wakes it, otherwise the
///   consumer is still registering and will observe `READY` on its own.
pub(crate) struct RawSignal {
    state: AtomicUsize,
    waiter: UnsafeCell<Option<Waker>>,
    fault: UnsafeCell<Option<Fault>>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct State: usize {
        const PENDING = 0b00_0000;
        /// A producer has claimed the signal and is storing the outcome.
        const COMPLETING = 0b00_0001;
        /// The outcome is stored and may be consumed.
        const READY = 0b00_0010;
        /// A consumer is writing the waiter slot.
        const REGISTERING = 0b00_0100;
        /// The waiter slot holds a waker.
        const WAITING = 0b00_1000;
        /// The waiter has been woken by the producer.
        const WOKEN = 0b01_0000;
        /// The outcome has been (or is being) taken out by the consumer.
        const CONSUMED = 0b10_0000;
    }
}
// PENDING MUST be zero
const_assert_eq!(State::PENDING.bits(), 0);

/// Returned by [`RawSignal::mark_ready`], tells the producer whether it now owns the waiter
/// slot and has to wake it.
#[must_use = "the waiter must be woken through `RawSignal::wake_waiter`"]
#[derive(Debug)]
pub(crate) struct Notify {
    owns_waiter: bool,
}

// === impl RawSignal ===

impl RawSignal {
    #[cfg(not(loom))]
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::PENDING.bits()),
            waiter: UnsafeCell::new(None),
            fault: UnsafeCell::new(None),
        }
    }

    #[cfg(loom)]
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicUsize::new(State::PENDING.bits()),
            waiter: UnsafeCell::new(None),
            fault: UnsafeCell::new(None),
        }
    }

    /// Returns `true` if an outcome has been delivered. Never suspends.
    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.current_state().contains(State::READY)
    }

    /// Called when a task attempts to await the signal.
    ///
    /// Returns `false` if the signal is already ready, the caller should then consume the outcome
    /// right away. Otherwise `waker` is stored as the sole waiter and `true` is returned.
    ///
    /// # Panics
    ///
    /// Panics if two tasks attempt to register concurrently.
    #[track_caller]
    pub(crate) fn on_suspend(&self, waker: &Waker) -> bool {
        if self.is_ready() {
            return false;
        }

        let prev = self.fetch_or(State::REGISTERING, Ordering::Acquire);
        if prev.contains(State::READY) {
            self.fetch_and(!State::REGISTERING, Ordering::Release);
            return false;
        }
        assert!(
            !prev.contains(State::REGISTERING),
            "completion signal awaited by more than one task at a time"
        );

        tracing::trace!(signal = ?self, ?waker, "registering waiter");

        // Safety: holding the REGISTERING bit gives us exclusive access to the waiter slot, the
        // producer only touches it when it observed WAITING without REGISTERING.
        let prev_waker = self.waiter.with_mut(|slot| unsafe {
            match &mut *slot {
                Some(old) if old.will_wake(waker) => None,
                old => old.replace(waker.clone()),
            }
        });
        // a waiter from an earlier poll of the same await, nothing to wake
        drop(prev_waker);

        let prev = self.transition(|s| {
            s.remove(State::REGISTERING);
            s.insert(State::WAITING);
        });

        if prev.contains(State::READY) {
            // The producer completed while we were registering and left the slot to us.
            tracing::trace!(signal = ?self, "completed while registering");

            // Safety: the producer saw REGISTERING when it set READY so it will never touch the
            // waiter slot, and further registrations bail out on READY.
            let waker = self.waiter.with_mut(|slot| unsafe { (*slot).take() });
            self.fetch_and(!State::WAITING, Ordering::Release);
            drop(waker);

            return false;
        }

        true
    }

    /// Stores `fault` as the outcome, marks the signal ready and wakes the waiter if one was
    /// captured.
    ///
    /// # Panics
    ///
    /// Panics if an outcome has already been stored.
    #[track_caller]
    pub(crate) fn fail(&self, fault: Fault) {
        tracing::trace!(signal = ?self, ?fault, "fail");

        self.begin_complete();
        // Safety: `begin_complete` made us the only producer and the consumer does not read the
        // fault before READY is set below.
        self.fault.with_mut(|slot| unsafe { *slot = Some(fault) });
        let notify = self.mark_ready();
        self.wake_waiter(notify);
    }

    /// Claims the right to store this signal's outcome.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already claimed by an earlier `resume` or `fail`.
    #[track_caller]
    pub(crate) fn begin_complete(&self) {
        let prev = self.fetch_or(State::COMPLETING, Ordering::AcqRel);
        assert!(
            !prev.contains(State::COMPLETING),
            "completion signal resumed more than once"
        );
    }

    /// Publishes the stored outcome. Must follow [`Self::begin_complete`] and the write of the
    /// outcome.
    pub(crate) fn mark_ready(&self) -> Notify {
        let prev = self.fetch_or(State::READY, Ordering::AcqRel);
        debug_assert!(prev.contains(State::COMPLETING));
        debug_assert!(!prev.contains(State::READY));

        Notify {
            owns_waiter: prev.contains(State::WAITING) && !prev.contains(State::REGISTERING),
        }
    }

    /// Wakes the waiter captured before the signal became ready, if any.
    ///
    /// This is a no-op when the signal completed synchronously, i.e. before anyone suspended on
    /// it. Returns `true` if a waiter was woken.
    pub(crate) fn wake_waiter(&self, notify: Notify) -> bool {
        if !notify.owns_waiter {
            return false;
        }

        // Safety: `mark_ready` observed WAITING without REGISTERING, the consumer has finished
        // writing the slot and will never write it again now that READY is set.
        let waker = self.waiter.with_mut(|slot| unsafe { (*slot).take() });
        self.transition(|s| {
            s.remove(State::WAITING);
            s.insert(State::WOKEN);
        });

        if let Some(waker) = waker {
            tracing::trace!(signal = ?self, ?waker, "waking waiter");
            waker.wake();
            true
        } else {
            false
        }
    }

    /// Claims the stored outcome for the consumer.
    ///
    /// # Panics
    ///
    /// Panics if the signal is not ready yet or its outcome was already consumed.
    #[track_caller]
    pub(crate) fn begin_consume(&self) {
        let prev = self.fetch_or(State::CONSUMED, Ordering::Acquire);
        assert!(
            !prev.contains(State::CONSUMED),
            "completion signal outcome consumed more than once"
        );
        if !prev.contains(State::READY) {
            self.fetch_and(!State::CONSUMED, Ordering::Release);
            panic!("completion signal consumed before it was ready");
        }
    }

    /// Takes the captured fault out of the signal, leaving `None` behind so it cannot be raised
    /// twice.
    ///
    /// # Safety
    ///
    /// The caller must have claimed the outcome through [`Self::begin_consume`].
    pub(crate) unsafe fn take_fault(&self) -> Option<Fault> {
        // Safety: ensured by caller
        self.fault.with_mut(|slot| unsafe { (*slot).take() })
    }

    /// Returns `true` if the producer had to wake a suspended waiter.
    #[cfg(test)]
    pub(crate) fn was_woken(&self) -> bool {
        self.current_state().contains(State::WOKEN)
    }

    fn transition(&self, mut f: impl FnMut(&mut State)) -> State {
        let mut current = self.current_state();
        loop {
            let mut next = current;
            f(&mut next);

            match self.state.compare_exchange_weak(
                current.bits(),
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current,
                Err(actual) => current = State::from_bits_retain(actual),
            }
        }
    }

    #[inline(always)]
    fn fetch_and(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_and(state.bits(), order))
    }

    #[inline(always)]
    fn fetch_or(&self, state: State, order: Ordering) -> State {
        State::from_bits_retain(self.state.fetch_or(state.bits(), order))
    }

    #[inline(always)]
    fn current_state(&self) -> State {
        State::from_bits_retain(self.state.load(Ordering::Acquire))
    }
}

impl Default for RawSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl RefUnwindSafe for RawSignal {}
impl UnwindSafe for RawSignal {}

// Safety: the waiter and fault slots are only accessed by whoever the state word grants
// exclusive access to.
unsafe impl Send for RawSignal {}
// Safety: see above
unsafe impl Sync for RawSignal {}

impl fmt::Debug for RawSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSignal")
            .field("state", &self.current_state())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::loom::sync::Arc;
    use core::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::task::Wake;

    #[derive(Default)]
    struct CountingWaker(StdAtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_waker() -> (Arc<CountingWaker>, Waker) {
        let counter = Arc::new(CountingWaker::default());
        let waker = Waker::from(counter.clone());
        (counter, waker)
    }

    #[test]
    fn suspend_then_fail_wakes_once() {
        let signal = RawSignal::new();
        let (counter, waker) = counting_waker();

        assert!(!signal.is_ready());
        assert!(signal.on_suspend(&waker), "pending signal should suspend");

        signal.fail(Fault::msg("boom"));

        assert!(signal.is_ready());
        assert!(signal.was_woken());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        signal.begin_consume();
        // Safety: consumption claimed above
        let fault = unsafe { signal.take_fault() }.unwrap();
        assert_eq!(fault.to_string(), "boom");

        // Safety: consumption claimed above
        assert!(unsafe { signal.take_fault() }.is_none());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ready_signal_does_not_suspend() {
        let signal = RawSignal::new();
        let (counter, waker) = counting_waker();

        signal.fail(Fault::msg("early"));

        assert!(!signal.on_suspend(&waker));
        assert!(!signal.was_woken());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reregistering_keeps_a_single_waiter() {
        let signal = RawSignal::new();
        let (first, first_waker) = counting_waker();
        let (second, second_waker) = counting_waker();

        assert!(signal.on_suspend(&first_waker));
        assert!(signal.on_suspend(&first_waker));
        assert!(signal.on_suspend(&second_waker));

        signal.fail(Fault::msg("boom"));

        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wake_without_waiter_is_noop() {
        let signal = RawSignal::new();
        signal.begin_complete();
        let notify = signal.mark_ready();
        assert!(!signal.wake_waiter(notify));
        assert!(signal.is_ready());
    }

    #[test]
    #[should_panic(expected = "resumed more than once")]
    fn double_fail_panics() {
        let signal = RawSignal::new();
        signal.fail(Fault::msg("first"));
        signal.fail(Fault::msg("second"));
    }

    #[test]
    #[should_panic(expected = "consumed before it was ready")]
    fn consume_before_ready_panics() {
        let signal = RawSignal::new();
        signal.begin_consume();
    }

    #[test]
    #[should_panic(expected = "consumed more than once")]
    fn double_consume_panics() {
        let signal = RawSignal::new();
        signal.fail(Fault::msg("boom"));
        signal.begin_consume();
        signal.begin_consume();
    }
}
