// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![expect(
    impl_trait_overcaptures,
    reason = "mycelium_bitfield is not updated to edition 2024 yet"
)]

use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use core::fmt;

/// Managing task state, stored in an atomic `usize`:
///
/// ```text
/// | 3        3 | 2        2 | 1     1 | 0       0 |
/// | released   | complete   | woken   | polling   |
/// ```
///
/// The `POLLING` bit doubles as the lock for the task's future: whoever set it may access the
/// future, nobody else may.
pub(crate) struct State {
    val: AtomicUsize,
}

mycelium_bitfield::bitfield! {
    /// A snapshot of a managing task's current state.
    #[derive(PartialEq, Eq)]
    pub(crate) struct Snapshot<usize> {
        /// If set, the task is currently being polled.
        pub const POLLING: bool;
        /// If set, the task was woken while it was being polled and has to be polled again.
        pub const WOKEN: bool;
        /// If set, the task's future has completed and was dropped.
        pub const COMPLETE: bool;
        /// If set, the owner of the task went away, the future must be dropped instead of being
        /// polled.
        pub const RELEASED: bool;
    }
}

#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum StartPollAction {
    /// Successful transition, it's okay to poll the task.
    Poll,
    /// The task is already being polled, has completed, or was released.
    DontPoll,
}

#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum EndPollAction {
    /// The future completed.
    Complete,
    /// The future is pending and nobody woke it during the poll.
    Pending,
    /// The task was woken during the poll, the caller still holds `POLLING` and must poll
    /// again.
    PollAgain,
    /// The owner released the task during the poll, the caller must drop the future.
    Released,
}

#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum WakeAction {
    /// The task was idle; the caller now holds `POLLING` and has to poll it.
    Poll,
    /// Nothing to do: the poll in flight will pick the wakeup up, or the task is done.
    None,
}

#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum ReleaseAction {
    /// The task is idle, the caller has exclusive access and must drop the future.
    DropFuture,
    /// A poll is in flight, whoever is polling will drop the future.
    Deferred,
    /// The future already completed.
    None,
}

impl State {
    #[cfg(not(loom))]
    pub(super) const fn new() -> Self {
        Self {
            val: AtomicUsize::new(0),
        }
    }

    #[cfg(loom)]
    pub(super) fn new() -> Self {
        Self {
            val: AtomicUsize::new(0),
        }
    }

    pub(super) fn load(&self, ordering: Ordering) -> Snapshot {
        Snapshot(self.val.load(ordering))
    }

    /// Attempt to transition the task from idle to `POLLING`.
    ///
    /// Should always be followed by [`Self::end_poll`] once the poll is done.
    pub(super) fn start_poll(&self) -> StartPollAction {
        self.transition(|s| {
            if s.get(Snapshot::POLLING) || s.get(Snapshot::COMPLETE) || s.get(Snapshot::RELEASED)
            {
                return StartPollAction::DontPoll;
            }

            s.set(Snapshot::POLLING, true);
            StartPollAction::Poll
        })
    }

    /// Finish a poll. `completed` is true if the future returned `Poll::Ready` (and has been
    /// dropped).
    pub(super) fn end_poll(&self, completed: bool) -> EndPollAction {
        self.transition(|s| {
            debug_assert!(s.get(Snapshot::POLLING));
            debug_assert!(!s.get(Snapshot::COMPLETE));

            if completed {
                s.set(Snapshot::POLLING, false)
                    .set(Snapshot::WOKEN, false)
                    .set(Snapshot::COMPLETE, true);
                return EndPollAction::Complete;
            }

            if s.get(Snapshot::RELEASED) {
                s.set(Snapshot::POLLING, false).set(Snapshot::WOKEN, false);
                return EndPollAction::Released;
            }

            if s.get(Snapshot::WOKEN) {
                // keep POLLING, the caller goes around once more
                s.set(Snapshot::WOKEN, false);
                return EndPollAction::PollAgain;
            }

            s.set(Snapshot::POLLING, false);
            EndPollAction::Pending
        })
    }

    pub(super) fn wake(&self) -> WakeAction {
        self.transition(|s| {
            if s.get(Snapshot::COMPLETE) || s.get(Snapshot::RELEASED) {
                return WakeAction::None;
            }

            // If the task is woken *during* a poll, the poller goes around again instead of us
            // polling it concurrently.
            if s.get(Snapshot::POLLING) {
                s.set(Snapshot::WOKEN, true);
                return WakeAction::None;
            }

            s.set(Snapshot::POLLING, true);
            WakeAction::Poll
        })
    }

    pub(super) fn release(&self) -> ReleaseAction {
        self.transition(|s| {
            if s.get(Snapshot::COMPLETE) || s.get(Snapshot::RELEASED) {
                return ReleaseAction::None;
            }

            s.set(Snapshot::RELEASED, true);

            if s.get(Snapshot::POLLING) {
                ReleaseAction::Deferred
            } else {
                ReleaseAction::DropFuture
            }
        })
    }

    fn transition<T>(&self, mut transition: impl FnMut(&mut Snapshot) -> T) -> T {
        let mut current = self.load(Ordering::Acquire);
        loop {
            let mut next = current;
            // Run the transition function.
            let res = transition(&mut next);

            if current.0 == next.0 {
                return res;
            }

            tracing::trace!("State::transition; current:\n{current}\nnext:\n{next}");
            match self.val.compare_exchange_weak(
                current.0,
                next.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return res,
                Err(actual) => current = Snapshot(actual),
            }
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn wake_while_polling_polls_again() {
        let state = State::new();

        assert_eq!(state.start_poll(), StartPollAction::Poll);
        assert_eq!(state.wake(), WakeAction::None);
        assert_eq!(state.end_poll(false), EndPollAction::PollAgain);
        assert_eq!(state.end_poll(false), EndPollAction::Pending);

        assert_eq!(state.wake(), WakeAction::Poll);
        assert_eq!(state.end_poll(true), EndPollAction::Complete);

        assert_eq!(state.wake(), WakeAction::None);
        assert_eq!(state.start_poll(), StartPollAction::DontPoll);
        assert_eq!(state.release(), ReleaseAction::None);
    }

    #[test]
    fn release_idle_task() {
        let state = State::new();

        assert_eq!(state.start_poll(), StartPollAction::Poll);
        assert_eq!(state.end_poll(false), EndPollAction::Pending);

        assert_eq!(state.release(), ReleaseAction::DropFuture);
        assert_eq!(state.wake(), WakeAction::None);
        assert_eq!(state.release(), ReleaseAction::None);
    }

    #[test]
    fn release_during_poll_is_deferred() {
        let state = State::new();

        assert_eq!(state.start_poll(), StartPollAction::Poll);
        assert_eq!(state.release(), ReleaseAction::Deferred);
        assert_eq!(state.wake(), WakeAction::None);
        assert_eq!(state.end_poll(false), EndPollAction::Released);

        let snapshot = state.load(Ordering::Acquire);
        assert!(!snapshot.get(Snapshot::POLLING));
        assert!(snapshot.get(Snapshot::RELEASED));
    }
}

#[cfg(all(test, loom))]
mod loom {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::thread;

    #[test]
    fn wake_during_poll_is_never_lost() {
        crate::loom::model(|| {
            let state = Arc::new(State::new());
            assert_eq!(state.start_poll(), StartPollAction::Poll);

            let waker = thread::spawn({
                let state = state.clone();
                move || state.wake()
            });

            let mut polls_again = 0;
            while state.end_poll(false) == EndPollAction::PollAgain {
                polls_again += 1;
            }
            let woke = waker.join().unwrap();

            // exactly one side takes responsibility for the next poll
            match woke {
                WakeAction::Poll => {
                    assert_eq!(polls_again, 0);
                    assert_eq!(state.end_poll(false), EndPollAction::Pending);
                }
                WakeAction::None => assert_eq!(polls_again, 1),
            }
        });
    }
}
