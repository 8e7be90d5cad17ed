// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Faults captured by asynchronous operations.
//!
//! A [`Fault`] is what a task raises instead of producing a value. It is captured wherever it is
//! raised, stored without being handled (in a [`Completion`][crate::Completion] or a
//! [result channel][crate::channel]) and surfaced again, unchanged, to whoever consumes the
//! outcome. Two kinds of faults exist:
//!
//! - *errors*, returned by task code as the `Err` variant of its output, and
//! - *panics*, caught while polling a task that unwound.

use alloc::boxed::Box;
use alloc::string::String;
use core::any::Any;
use core::error::Error;
use core::fmt;

/// A type-erased, move-only container for an error raised by asynchronous work.
///
/// `Fault` deliberately does **not** implement [`Error`] itself; this lets every
/// `E: Error + Send + Sync + 'static` be converted into it with `?`. Use [`Fault::as_error`] to
/// get at the wrapped error.
pub struct Fault {
    repr: Repr,
}

enum Repr {
    Error(Box<dyn Error + Send + Sync + 'static>),
    Panic(Box<dyn Any + Send + 'static>),
}

/// The error delivered through a result channel whose sending half was dropped without ever
/// sending an outcome.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Disconnected(pub(crate) ());

/// Plain message error backing [`Fault::msg`].
struct Message<M>(M);

// === impl Fault ===

impl Fault {
    /// Capture `error` as a fault.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            repr: Repr::Error(Box::new(error)),
        }
    }

    /// Capture a fault that consists of nothing but a message.
    ///
    /// ```
    /// # use kawait::Fault;
    /// let fault = Fault::msg("boom");
    /// assert_eq!(fault.to_string(), "boom");
    /// ```
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            repr: Repr::Error(Box::new(Message(message))),
        }
    }

    /// Capture the payload of a panic (as returned by [`std::panic::catch_unwind`]) as a fault.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self {
            repr: Repr::Panic(payload),
        }
    }

    /// Returns true if the fault was raised by code that panicked.
    pub fn is_panic(&self) -> bool {
        matches!(&self.repr, Repr::Panic(_))
    }

    /// Returns true if the fault is an error returned by task code.
    pub fn is_error(&self) -> bool {
        matches!(&self.repr, Repr::Error(_))
    }

    /// Returns true if the fault was produced because a result sender went away without sending.
    pub fn is_disconnected(&self) -> bool {
        self.downcast_ref::<Disconnected>().is_some()
    }

    /// Returns the wrapped error, or `None` if this fault is a panic.
    pub fn as_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match &self.repr {
            Repr::Error(err) => Some(err.as_ref()),
            Repr::Panic(_) => None,
        }
    }

    /// Returns a reference to the wrapped error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        self.as_error()?.downcast_ref::<E>()
    }

    /// Attempts to take the wrapped error out as a concrete `E`, returning `self` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` if this fault is a panic or wraps a different error type.
    pub fn downcast<E>(self) -> Result<E, Self>
    where
        E: Error + 'static,
    {
        match self.repr {
            Repr::Error(err) => err.downcast::<E>().map(|err| *err).map_err(|err| Self {
                repr: Repr::Error(err),
            }),
            repr => Err(Self { repr }),
        }
    }

    /// Consumes the fault, returning the object with which the task panicked if the fault is a
    /// panic. Otherwise, `self` is returned.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` if this fault is not a panic.
    pub fn try_into_panic(self) -> Result<Box<dyn Any + Send + 'static>, Self> {
        match self.repr {
            Repr::Panic(payload) => Ok(payload),
            repr => Err(Self { repr }),
        }
    }

    /// Consumes the fault, returning the object with which the task panicked.
    ///
    /// # Panics
    ///
    /// Panics if the fault does not represent a panic. Use [`Self::is_panic`] to check or
    /// [`Self::try_into_panic`] for a variant that does not panic.
    #[track_caller]
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self.try_into_panic() {
            Ok(payload) => payload,
            Err(fault) => panic!("fault is not a panic: {fault}"),
        }
    }

    /// Re-raises the fault on the current thread.
    ///
    /// Panic faults continue unwinding with the original payload, error faults raise a new panic
    /// carrying the error's message.
    pub fn resume_unwind(self) -> ! {
        match self.repr {
            Repr::Panic(payload) => std::panic::resume_unwind(payload),
            Repr::Error(err) => std::panic::panic_any(err.to_string()),
        }
    }
}

impl<E> From<E> for Fault
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Error(err) => fmt::Display::fmt(err, f),
            Repr::Panic(payload) => match payload_as_str(payload.as_ref()) {
                Some(msg) => f.write_str(msg),
                None => f.write_str("Box<dyn Any>"),
            },
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Error(err) => f.debug_tuple("Fault::Error").field(err).finish(),
            Repr::Panic(payload) => f
                .debug_tuple("Fault::Panic")
                .field(&payload_as_str(payload.as_ref()))
                .finish(),
        }
    }
}

/// Returns the message of a panic payload if it is one of the two types `panic!` produces.
pub(crate) fn payload_as_str<'a>(payload: &'a (dyn Any + Send + 'static)) -> Option<&'a str> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        Some(s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Some(s.as_str())
    } else {
        None
    }
}

// === impl Disconnected ===

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("result sender dropped without sending")
    }
}

impl Error for Disconnected {}

// === impl Message ===

impl<M: fmt::Display> fmt::Display for Message<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<M: fmt::Debug> fmt::Debug for Message<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<M: fmt::Display + fmt::Debug> Error for Message<M> {}
