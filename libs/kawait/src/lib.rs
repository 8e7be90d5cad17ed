// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Awaitable completion signals and a runner that carries a task's outcome out of async code.
//!
//! - [`Completion`] is a one-shot signal a task can await: a producer resumes it with a value (or
//!   fails it with a [`Fault`]) and the single waiting task is woken and takes the outcome.
//! - [`TaskRunner`] wraps a future in a managing task, drives it eagerly and publishes the
//!   future's result into a write-once [result channel](channel), which regular threads can
//!   block on.

extern crate alloc;

pub mod channel;
mod completion;
mod fault;
mod loom;
pub mod park;
pub mod runner;
mod signal;
pub mod task;

pub use channel::{ResultReceiver, ResultSender, channel};
pub use completion::{Completion, Wait};
pub use fault::{Disconnected, Fault};
pub use park::Parker;
pub use runner::{Builder, TaskOutput, TaskRunner};
pub use task::Id;
