// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A write-once channel carrying the outcome of a task out of the cooperative task world.
//!
//! The channel has exactly one [`ResultSender`] and one [`ResultReceiver`]. The sender writes a
//! single outcome, a value or a [`Fault`]. The receiver can be awaited from async code, polled
//! with [`ResultReceiver::is_ready`], or blocked on from a regular thread with
//! [`ResultReceiver::recv`].
//!
//! Both halves share one [`Completion`], so the channel inherits its exactly-once guarantees.

use crate::completion::Completion;
use crate::fault::{Disconnected, Fault};
use crate::park::Parker;
use alloc::sync::Arc;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::time::Instant;

/// Creates a new result channel, returning the sending and receiving halves.
pub fn channel<T>() -> (ResultSender<T>, ResultReceiver<T>) {
    let inner = Arc::new(Completion::new());

    let tx = ResultSender {
        inner: Some(inner.clone()),
    };
    let rx = ResultReceiver { inner };

    (tx, rx)
}

/// The sending half of a result channel.
///
/// Dropping the sender without calling [`send`][Self::send] delivers a [`Disconnected`] fault to
/// the receiver, so a receiver never waits for an outcome that cannot arrive.
pub struct ResultSender<T> {
    inner: Option<Arc<Completion<T>>>,
}

/// The receiving half of a result channel.
///
/// Awaiting the receiver (it implements [`Future`]) or calling [`recv`][Self::recv] yields the
/// value that was sent, or surfaces the fault that was sent instead.
pub struct ResultReceiver<T> {
    inner: Arc<Completion<T>>,
}

// === impl ResultSender ===

impl<T> ResultSender<T> {
    /// Writes the channel's one outcome and wakes the receiver if it is waiting.
    ///
    /// The outcome is always stored, even if the receiver has already been dropped (in which case
    /// it is dropped together with the channel).
    pub fn send(mut self, outcome: Result<T, Fault>) {
        let Some(inner) = self.inner.take() else {
            unreachable!("result sender used after sending");
        };

        match outcome {
            Ok(value) => inner.resume(value),
            Err(fault) => inner.fail(fault),
        }
    }

    /// Returns `true` if the receiving half has been dropped. A sent outcome would never be
    /// observed.
    pub fn is_closed(&self) -> bool {
        self.inner
            .as_ref()
            .is_none_or(|inner| Arc::strong_count(inner) == 1)
    }
}

impl<T> Drop for ResultSender<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tracing::trace!(signal = ?inner, "result sender dropped without sending");
            inner.fail(Fault::new(Disconnected(())));
        }
    }
}

impl<T> fmt::Debug for ResultSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSender")
            .field("inner", &self.inner)
            .finish()
    }
}

// === impl ResultReceiver ===

impl<T> ResultReceiver<T> {
    /// Returns `true` if an outcome has been sent (or the sender went away). Never blocks.
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Blocks the calling thread until an outcome is available.
    ///
    /// This must not be called from inside a task driven by the thread it blocks, that task
    /// would never get to send.
    pub fn wait(&self) {
        if self.is_ready() {
            return;
        }

        let parker = Parker::for_current();
        let waker = parker.clone().into_waker();

        while self.inner.on_suspend(&waker) {
            parker.park();
        }
    }

    /// Blocks the calling thread until an outcome is available or `timeout` elapses.
    ///
    /// Returns `true` if the outcome is available.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }

        // a timeout too large to represent is waiting forever
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let parker = Parker::for_current();
        let waker = parker.clone().into_waker();

        while self.inner.on_suspend(&waker) {
            let now = Instant::now();
            if now >= deadline {
                tracing::trace!(?timeout, "wait timed out");
                return self.is_ready();
            }
            parker.park_timeout(deadline - now);
        }

        true
    }

    /// Blocks until the outcome is available and returns it.
    ///
    /// # Errors
    ///
    /// Returns the [`Fault`] that was sent, or a [`Disconnected`] fault if the sender was dropped
    /// without sending.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn recv(self) -> Result<T, Fault> {
        self.wait();
        self.inner.consume_result()
    }

    /// Returns the outcome if it is available, without blocking.
    ///
    /// # Errors
    ///
    /// Returns `self` back if no outcome has been sent yet.
    pub fn try_recv(self) -> Result<Result<T, Fault>, Self> {
        if self.is_ready() {
            Ok(self.inner.consume_result())
        } else {
            Err(self)
        }
    }
}

impl<T> Future for ResultReceiver<T> {
    type Output = Result<T, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_wait(cx)
    }
}

impl<T> fmt::Debug for ResultReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultReceiver")
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::thread;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

    #[test]
    fn send_then_recv() {
        let (tx, rx) = channel();
        tx.send(Ok(42));
        assert!(rx.is_ready());
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    fn send_fault() {
        let (tx, rx) = channel::<u32>();
        tx.send(Err(Fault::msg("boom")));
        assert_eq!(rx.recv().unwrap_err().to_string(), "boom");
    }

    #[test]
    fn dropped_sender_disconnects() {
        let (tx, rx) = channel::<u32>();
        drop(tx);

        let fault = rx.recv().unwrap_err();
        assert!(fault.is_disconnected());
    }

    #[test]
    fn recv_blocks_until_sent() {
        let (tx, rx) = channel();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(Ok("late"));
        });

        assert_eq!(rx.recv().unwrap(), "late");
        producer.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires() {
        let (tx, rx) = channel::<()>();

        assert!(!rx.wait_timeout(Duration::from_millis(10)));
        assert!(!rx.is_ready());

        tx.send(Ok(()));
        assert!(rx.wait_timeout(Duration::from_millis(10)));
        rx.recv().unwrap();
    }

    #[test]
    fn wait_timeout_beyond_instant_range() {
        let (tx, rx) = channel();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(Ok(3));
        });

        assert!(rx.wait_timeout(Duration::MAX));
        assert_eq!(rx.recv().unwrap(), 3);
        producer.join().unwrap();
    }

    #[test]
    fn try_recv() {
        let (tx, rx) = channel();

        let rx = rx.try_recv().unwrap_err();
        tx.send(Ok(1));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 1);
    }

    #[test]
    fn is_closed() {
        let (tx, rx) = channel::<()>();
        assert!(!tx.is_closed());
        drop(rx);
        assert!(tx.is_closed());
        tx.send(Ok(()));
    }

    #[test]
    fn await_receiver() {
        let (tx, rx) = channel();
        let mut task = task::spawn(rx);

        assert_pending!(task.poll());
        tx.send(Ok(5));
        assert!(task.is_woken());
        assert_eq!(assert_ready_ok!(task.poll()), 5);
    }

    #[test]
    fn await_receiver_disconnected() {
        let (tx, rx) = channel::<u8>();
        let mut task = task::spawn(rx);

        assert_pending!(task.poll());
        drop(tx);
        assert!(task.is_woken());
        assert!(assert_ready_err!(task.poll()).is_disconnected());
    }
}
