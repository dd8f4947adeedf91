//! Error types and error handling strategy.
//!
//! Errors fall into three distinct channels:
//!
//! - **Usage/contract violations**: starting an operation while one is
//!   already running, completing with nothing staged, completing against a
//!   stale progress identity, or destroying state that is still in use.
//!   These indicate a bug in the calling code. Under the default
//!   [`TrackErrors`](crate::TrackErrors) policy the unrecoverable ones fail
//!   fast (panic at the violation point); the recoverable ones surface as
//!   [`StartError`] / [`CompleteError`] values.
//! - **Deadlock**: mutating a value from the thread that is currently
//!   delivering its own state-change notification would self-deadlock on the
//!   serializing lock. The tracking policy detects this and returns
//!   [`DeadlockError`] to the offending call site instead of hanging.
//! - **Domain errors**: the ERROR branch of the value itself. These are
//!   ordinary, expected outcomes (a computation failed, or was stopped by
//!   request) observed through the same `access`/`wait` channel as success.
//!   [`AsyncError`] is the conventional message-carrying default.

use thiserror::Error;

/// The calling thread is currently delivering a state-change notification
/// for this same value, so mutating it would recursively acquire the
/// serializing lock and deadlock.
///
/// Only detected under a tracking policy; the no-op policy leaves the
/// underlying deadlock in place, exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value mutated from the thread delivering its own state-change notification")]
pub struct DeadlockError;

/// Failure to start a progress-reporting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    /// Another operation is already in progress. Starting a second one is a
    /// usage error, not an implicit queue: existing content is untouched.
    #[error("an operation is already in progress")]
    AlreadyInProgress,
    /// The start was issued from inside a state-change notification.
    #[error(transparent)]
    Deadlock(#[from] DeadlockError),
}

/// Failure to complete a progress-reporting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompleteError {
    /// The passed progress is not the currently installed one. Guards
    /// against stale completions after a newer run started; the completion
    /// is a no-op and the state is unaffected.
    #[error("completion does not match the active progress")]
    Alien,
    /// Neither a value nor an error was staged during the progress window.
    /// A fatal contract violation under the tracking policy; an operation
    /// never silently produces an empty successful state.
    #[error("no value or error was staged during the progress window")]
    Incomplete,
}

/// Conventional domain error carried by the ERROR branch of a value.
///
/// This is a normal runtime outcome, not an exception channel: a computation
/// that fails (or honors a stop request) deposits one of these and the value
/// settles in the ERROR state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[error("{message}")]
pub struct AsyncError {
    message: String,
}

impl AsyncError {
    /// Creates an error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The conventional outcome of a computation that honored a stop
    /// request.
    #[must_use]
    pub fn stopped() -> Self {
        Self::new("stopped by request")
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for AsyncError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for AsyncError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
