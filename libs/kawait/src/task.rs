// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The self-driving task behind a [`TaskRunner`][crate::TaskRunner].
//!
//! There is no scheduler: a task is polled once, eagerly, when it is started, and after that by
//! whichever thread wakes it. A wakeup that arrives while the task is being polled is not lost,
//! the thread currently polling goes around once more instead.

mod id;
mod state;

use crate::loom::cell::UnsafeCell;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::task::{ArcWake, waker_ref};
use state::{EndPollAction, ReleaseAction, StartPollAction, State, WakeAction};

pub use id::Id;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) struct Task {
    inner: Arc<Inner>,
}

struct Inner {
    state: State,
    id: Id,
    span: tracing::Span,
    /// Only accessed by whoever holds the `POLLING` bit, or by the releasing thread once the
    /// task is released and idle.
    future: UnsafeCell<Option<BoxFuture>>,
}

// Safety: access to the future is serialized through `State`, and the future itself is `Send`
unsafe impl Send for Inner {}
// Safety: see above
unsafe impl Sync for Inner {}

// === impl Task ===

impl Task {
    pub(crate) fn new<F>(id: Id, span: tracing::Span, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: State::new(),
                id,
                span,
                future: UnsafeCell::new(Some(Box::pin(future))),
            }),
        }
    }

    /// Polls the task for the first time on the calling thread.
    pub(crate) fn run(&self) {
        match self.inner.state.start_poll() {
            StartPollAction::Poll => self.inner.poll_loop(),
            StartPollAction::DontPoll => {
                tracing::trace!(task.id = %self.inner.id, "task already started");
            }
        }
    }

    /// Gives up the task. If it has not completed yet its future is dropped, either right here
    /// or by the thread currently polling it, and it is never polled again.
    pub(crate) fn release(&self) {
        match self.inner.state.release() {
            ReleaseAction::DropFuture => {
                let _entered = self.inner.span.enter();
                tracing::trace!("dropping released task");
                // Safety: the task is released and was idle, the state machine guarantees nobody
                // else will touch the future again
                drop(unsafe { self.inner.take_future() });
            }
            ReleaseAction::Deferred => {
                tracing::trace!(task.id = %self.inner.id, "task released while polling");
            }
            ReleaseAction::None => {}
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.inner
            .state
            .load(crate::loom::sync::atomic::Ordering::Acquire)
            .get(state::Snapshot::COMPLETE)
    }

    pub(crate) fn id(&self) -> Id {
        self.inner.id
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

// === impl Inner ===

impl Inner {
    /// Polls the future until it either completes or stays pending without being woken.
    ///
    /// The caller must hold the `POLLING` bit.
    fn poll_loop(self: &Arc<Self>) {
        let _entered = self.span.enter();
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        loop {
            tracing::trace!("polling task");

            // Safety: we hold `POLLING`, so we have exclusive access to the future
            let completed = self.future.with_mut(|slot| unsafe {
                let slot = &mut *slot;
                match slot {
                    Some(future) => {
                        if let Poll::Ready(()) = future.as_mut().poll(&mut cx) {
                            // drop the future before publishing COMPLETE
                            *slot = None;
                            true
                        } else {
                            false
                        }
                    }
                    None => {
                        debug_assert!(false, "polled a task without a future");
                        true
                    }
                }
            });

            match self.state.end_poll(completed) {
                EndPollAction::Complete => {
                    tracing::trace!("task completed");
                    return;
                }
                EndPollAction::Pending => return,
                EndPollAction::PollAgain => continue,
                EndPollAction::Released => {
                    tracing::trace!("task released during poll, dropping");
                    // Safety: the task is released, `release` deferred dropping the future to
                    // us and nobody can start a new poll
                    drop(unsafe { self.take_future() });
                    return;
                }
            }
        }
    }

    /// # Safety
    ///
    /// The caller must have exclusive access to the future slot.
    unsafe fn take_future(&self) -> Option<BoxFuture> {
        // Safety: ensured by caller
        self.future.with_mut(|slot| unsafe { (*slot).take() })
    }
}

impl ArcWake for Inner {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        match arc_self.state.wake() {
            WakeAction::Poll => arc_self.poll_loop(),
            WakeAction::None => {}
        }
    }
}
