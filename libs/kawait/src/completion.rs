// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::fault::Fault;
use crate::loom::cell::UnsafeCell;
use crate::signal::RawSignal;
use core::fmt;
use core::panic::{RefUnwindSafe, UnwindSafe};
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

/// A single-use, awaitable completion signal carrying a value of type `T`.
///
/// A `Completion` is the building block of asynchronous operations: the task performing the
/// operation awaits it (through [`wait`][Self::wait]), and whatever event drives the operation
/// forward (an interrupt, an I/O completion, another thread) calls [`resume`][Self::resume] with
/// the value or [`fail`][Self::fail] with a [`Fault`].
///
/// Exactly one outcome is delivered, exactly once:
///
/// - A producer may complete the signal before anyone awaits it. The first poll of the await then
///   finishes immediately, without suspending.
/// - If a task is suspended on the signal, it is woken exactly once, after the outcome has been
///   stored.
/// - Resuming or failing a signal twice, or consuming its outcome twice, is a contract violation
///   and panics.
///
/// `Completion<()>` is the value-less variant, use [`complete`][Completion::complete] to resume
/// it.
///
/// # Example
///
/// ```
/// # use kawait::Completion;
/// # futures::executor::block_on(async {
/// let signal = Completion::new();
/// signal.resume(7);
///
/// assert_eq!(signal.wait().await.unwrap(), 7);
/// # });
/// ```
pub struct Completion<T> {
    core: RawSignal,
    value: UnsafeCell<Option<T>>,
}

/// Future returned from [`Completion::wait()`].
///
/// Resolves to the value the signal was resumed with, or to the fault it failed with.
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Wait<'a, T> {
    completion: &'a Completion<T>,
    done: bool,
}

// === impl Completion ===

impl<T> Completion<T> {
    /// Returns a new, not yet ready signal.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            core: RawSignal::new(),
            value: UnsafeCell::new(None),
        }
    }

    /// Returns a new, not yet ready signal.
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            core: RawSignal::new(),
            value: UnsafeCell::new(None),
        }
    }

    /// Returns `true` if an outcome has been delivered. This method never suspends.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// The suspend step of the await protocol.
    ///
    /// Returns `false` if the signal is already ready, in which case the outcome may be
    /// [consumed](Self::consume_result) right away. Otherwise `waker` becomes the signal's sole
    /// waiter and `true` is returned: it will be woken once the outcome has been stored.
    ///
    /// # Panics
    ///
    /// Panics if two tasks attempt to register at the same time.
    #[inline]
    #[track_caller]
    pub fn on_suspend(&self, waker: &Waker) -> bool {
        self.core.on_suspend(waker)
    }

    /// Resumes the signal with `value`, waking the waiting task if there is one.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already resumed or failed.
    #[track_caller]
    pub fn resume(&self, value: T) {
        tracing::trace!(signal = ?self.core, "resume");

        self.core.begin_complete();
        // Safety: `begin_complete` made us the only producer and the consumer does not read the
        // value before `mark_ready` publishes it.
        self.value.with_mut(|slot| unsafe { *slot = Some(value) });
        let notify = self.core.mark_ready();
        self.core.wake_waiter(notify);
    }

    /// Fails the signal with `fault`, waking the waiting task if there is one. The fault is
    /// surfaced by [`consume_result`][Self::consume_result] instead of a value.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already resumed or failed.
    #[track_caller]
    pub fn fail(&self, fault: impl Into<Fault>) {
        self.core.fail(fault.into());
    }

    /// Takes the outcome out of a ready signal.
    ///
    /// A captured fault is returned as `Err` so it propagates with `?` the same way an error
    /// raised by the awaiting task itself would. Otherwise the stored value is moved out.
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] passed to [`fail`][Self::fail].
    ///
    /// # Panics
    ///
    /// Panics if the signal is not ready yet, or if its outcome was already consumed.
    #[track_caller]
    pub fn consume_result(&self) -> Result<T, Fault> {
        self.core.begin_consume();

        // Safety: `begin_consume` gave us exclusive access to the outcome.
        if let Some(fault) = unsafe { self.core.take_fault() } {
            tracing::trace!(signal = ?self.core, ?fault, "consumed fault");
            return Err(fault);
        }

        // Safety: `begin_consume` gave us exclusive access to the outcome, it is only ever taken
        // once.
        let value = self.value.with_mut(|slot| unsafe { (*slot).take() });
        match value {
            Some(value) => Ok(value),
            None => unreachable!("ready completion signal without an outcome"),
        }
    }

    /// Consumes the outcome if the signal is ready, without suspending.
    ///
    /// Returns `None` if the signal is still pending.
    ///
    /// # Panics
    ///
    /// Panics if the outcome was already consumed.
    #[track_caller]
    pub fn try_take(&self) -> Option<Result<T, Fault>> {
        if self.is_ready() {
            Some(self.consume_result())
        } else {
            None
        }
    }

    /// Waits for the signal to be resumed or failed.
    ///
    /// The returned [`Wait`] future follows the await protocol: if the signal is ready on the first
    /// poll it completes without suspending, otherwise it registers the polling task as the
    /// signal's waiter.
    pub fn wait(&self) -> Wait<'_, T> {
        Wait {
            completion: self,
            done: false,
        }
    }

    /// Polls for the outcome, registering the task in `cx` as the waiter if it is not available
    /// yet.
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<Result<T, Fault>> {
        if self.on_suspend(cx.waker()) {
            return Poll::Pending;
        }

        Poll::Ready(self.consume_result())
    }
}

impl Completion<()> {
    /// Resumes a value-less signal, waking the waiting task if there is one.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already resumed or failed.
    #[track_caller]
    pub fn complete(&self) {
        self.resume(());
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefUnwindSafe for Completion<T> {}
impl<T> UnwindSafe for Completion<T> {}

// Safety: the value is handed from exactly one producer to exactly one consumer, the state word of
// `RawSignal` orders the two accesses
unsafe impl<T: Send> Send for Completion<T> {}
// Safety: see above
unsafe impl<T: Send> Sync for Completion<T> {}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("core", &self.core)
            .field("output", &core::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

// === impl Wait ===

impl<T> Future for Wait<'_, T> {
    type Output = Result<T, Fault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.done, "`Wait` polled after completion");

        let res = self.completion.poll_wait(cx);
        if res.is_ready() {
            self.done = true;
        }
        res
    }
}


#[cfg(all(test, not(loom)))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn outcome_fidelity(value in any::<u64>(), fail in any::<bool>(), message in "[a-z]{1,16}") {
            let signal = Completion::new();

            if fail {
                signal.fail(Fault::msg(message.clone()));
            } else {
                signal.resume(value);
            }

            match crate::loom::future::block_on(signal.wait()) {
                Ok(got) => {
                    prop_assert!(!fail);
                    prop_assert_eq!(got, value);
                }
                Err(fault) => {
                    prop_assert!(fail);
                    prop_assert_eq!(fault.to_string(), message);
                }
            }
        }
    }
}
