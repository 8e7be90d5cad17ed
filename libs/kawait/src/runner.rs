// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Running a task eagerly and handing its outcome to the outside world.
//!
//! A [`TaskRunner`] wraps a future in a managing task, drives it right away on the calling thread
//! and forwards whatever the future produces (a value, a returned error or a panic) into a
//! [result channel](crate::channel). The receiving half is what the non-async caller holds on to:
//!
//! ```
//! use kawait::TaskRunner;
//!
//! let mut runner = TaskRunner::new(async { Ok::<_, std::io::Error>(42) });
//! let rx = runner.result_channel();
//! assert_eq!(rx.recv().unwrap(), 42);
//! ```

use crate::channel::{ResultReceiver, channel};
use crate::fault::Fault;
use crate::task::{Id, Task};
use core::any::type_name;
use core::fmt;
use core::panic::{AssertUnwindSafe, Location};
use futures::FutureExt;

/// The outcome of a future driven by a [`TaskRunner`].
///
/// This decides what the result channel carries: a future returning `Result<T, E>` produces a
/// `TaskRunner<T>` whose channel surfaces `E` as a [`Fault`], a future returning `()` produces a
/// `TaskRunner<()>`.
pub trait TaskOutput: Send + 'static {
    type Value: Send + 'static;

    /// Converts the output into the outcome that is sent over the result channel.
    ///
    /// # Errors
    ///
    /// Returns the fault the task raised.
    fn into_outcome(self) -> Result<Self::Value, Fault>;
}

impl TaskOutput for () {
    type Value = ();

    fn into_outcome(self) -> Result<(), Fault> {
        Ok(())
    }
}

impl<T, E> TaskOutput for Result<T, E>
where
    T: Send + 'static,
    E: Into<Fault> + Send + 'static,
{
    type Value = T;

    fn into_outcome(self) -> Result<T, Fault> {
        self.map_err(Into::into)
    }
}

/// Configures the managing task spawned for a [`TaskRunner`].
///
/// Only affects diagnostics: the name, kind and location show up in the task's tracing span.
pub struct Builder<'a> {
    location: Option<Location<'a>>,
    name: Option<&'a str>,
    kind: &'a str,
}

/// Owns a managing task and the consuming half of its result channel.
///
/// The task was already started by the time the runner is returned, it may even have finished.
/// Dropping the runner gives the task up: an unfinished future is dropped and the result channel
/// reports [`Disconnected`][crate::Disconnected].
pub struct TaskRunner<T> {
    task: Task,
    rx: Option<ResultReceiver<T>>,
}

// === impl Builder ===

impl Default for Builder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Builder<'a> {
    pub const fn new() -> Self {
        Self {
            location: None,
            name: None,
            kind: "task",
        }
    }

    /// Override the name of tasks spawned by this builder.
    ///
    /// By default, tasks are unnamed.
    pub fn name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    /// Override the kind string of tasks spawned by this builder, this will only show up
    /// in debug messages and spans.
    ///
    /// By default, tasks are of kind `"task"`.
    pub fn kind(mut self, kind: &'a str) -> Self {
        self.kind = kind;
        self
    }

    /// Override the source code location that will be associated with tasks spawned by this
    /// builder.
    ///
    /// By default, tasks inherit the source code location of where they have been spawned.
    pub fn location(mut self, location: Location<'a>) -> Self {
        self.location = Some(location);
        self
    }

    /// Wraps `future` in a managing task and drives it until it first suspends or completes.
    ///
    /// Returns once the first poll is over.
    #[track_caller]
    pub fn spawn<F>(&self, future: F) -> TaskRunner<<F::Output as TaskOutput>::Value>
    where
        F: Future + Send + 'static,
        F::Output: TaskOutput,
    {
        let id = Id::next();

        let loc = self.location.as_ref().unwrap_or(Location::caller());
        let span = tracing::trace_span!(
            "task",
            task.tid = id.as_u64(),
            task.name = ?self.name,
            task.kind = self.kind,
            task.output = %type_name::<F::Output>(),
            loc.file = loc.file(),
            loc.line = loc.line(),
            loc.col = loc.column(),
        );

        let (tx, rx) = channel();
        let task = Task::new(id, span, async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(output) => output.into_outcome(),
                Err(payload) => Err(Fault::from_panic(payload)),
            };

            if let Err(fault) = &outcome {
                tracing::debug!(?fault, "task raised a fault");
            }
            tx.send(outcome);
        });

        task.run();

        TaskRunner { task, rx: Some(rx) }
    }
}

// === impl TaskRunner ===

impl<T> TaskRunner<T>
where
    T: Send + 'static,
{
    /// Wraps `future` in a managing task and drives it until it first suspends or completes.
    ///
    /// See [`Builder`] for customizing the task's tracing span.
    #[track_caller]
    pub fn new<F>(future: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: TaskOutput<Value = T>,
    {
        Builder::new().spawn(future)
    }
}

impl<T> TaskRunner<T> {
    /// Hands out the consuming half of the result channel.
    ///
    /// # Panics
    ///
    /// Panics if the result channel was already taken.
    #[track_caller]
    pub fn result_channel(&mut self) -> ResultReceiver<T> {
        match self.rx.take() {
            Some(rx) => rx,
            None => panic!("result channel already taken from task {}", self.task.id()),
        }
    }

    /// Returns `true` if the managing task has run to completion, its outcome has been sent.
    pub fn is_finished(&self) -> bool {
        self.task.is_complete()
    }

    /// Returns the [`Id`] of the managing task.
    pub fn id(&self) -> Id {
        self.task.id()
    }
}

impl<T> Drop for TaskRunner<T> {
    fn drop(&mut self) {
        self.task.release();
    }
}

impl<T> fmt::Debug for TaskRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("task", &self.task)
            .field("output", &type_name::<T>())
            .field("channel_taken", &self.rx.is_none())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use alloc::sync::Arc;
    use std::io;

    #[test]
    fn builder_defaults() {
        let builder = Builder::default();
        assert!(builder.name.is_none());
        assert!(builder.location.is_none());
        assert_eq!(builder.kind, "task");

        let builder = builder.name("worker").kind("blocking");
        assert_eq!(builder.name, Some("worker"));
        assert_eq!(builder.kind, "blocking");
    }

    #[test]
    fn output_conversion() {
        assert!(().into_outcome().is_ok());
        assert_eq!(Ok::<_, Fault>(3).into_outcome().unwrap(), 3);

        let fault = Err::<(), _>(io::Error::other("gone"))
            .into_outcome()
            .unwrap_err();
        assert_eq!(fault.downcast_ref::<io::Error>().unwrap().to_string(), "gone");
    }

    #[test]
    fn eager_start() {
        let runner = TaskRunner::new(async { Ok::<_, Fault>("done") });
        // finished during construction, nobody polled the channel yet
        assert!(runner.is_finished());
    }

    #[test]
    fn pending_task_finishes_on_resume() {
        let signal = Arc::new(Completion::<u8>::new());
        let mut runner = TaskRunner::new({
            let signal = signal.clone();
            async move { signal.wait().await.map(|v| v * 2) }
        });
        assert!(!runner.is_finished());

        let rx = runner.result_channel();
        assert!(!rx.is_ready());

        signal.resume(21);
        assert!(runner.is_finished());
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    #[should_panic(expected = "result channel already taken")]
    fn result_channel_twice() {
        let mut runner = TaskRunner::new(async {});
        let _rx = runner.result_channel();
        let _rx = runner.result_channel();
    }

    #[test]
    fn distinct_ids() {
        let a = TaskRunner::new(async {});
        let b = Builder::new().name("b").spawn(async {});
        assert_ne!(a.id(), b.id());
    }
}
