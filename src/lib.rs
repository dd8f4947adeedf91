//! A concurrency-safe tri-state value.
//!
//! # Overview
//!
//! An [`AsyncValue`] holds exactly one of a computed value, an error, or a
//! reference to an in-flight progress-reporting operation. Any number of
//! threads can observe it, block on it, and be notified when it changes.
//! Cancellation is cooperative, and the runnable wrapper coalesces restart
//! requests issued while a computation is already running.
//!
//! # Core Guarantees
//!
//! - **One populated branch**: the observable state is always exactly one of
//!   value, error, or progress, and readers dispatch to exactly one callback
//! - **Committed before visible**: a completion notifies and wakes waiters
//!   only after the staged result is committed
//! - **Broadcast wakeup**: all blocked waiters on a completion are released
//!   together, tolerant of spurious wakeups
//! - **Deadlock detection**: self-reentrant mutation from a state-change
//!   notification is rejected with an error instead of hanging
//! - **Rerun coalescing**: any number of concurrent restart requests while
//!   busy collapse into at most one extra pass
//!
//! # Module Structure
//!
//! - [`value`]: the tri-state container, waiter protocol, and subscriptions
//! - [`value::track`]: pluggable misuse-tracking policies
//! - [`value::runnable`]: the coalesced-rerun wrapper
//! - [`progress`]: progress records and cooperative stop/rerun flags
//! - [`run`]: scheduling adapters bracketing start/complete
//! - [`error`]: contract errors and the default domain error
//! - [`test_utils`]: logging and assertion helpers for tests
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use async_value::{run_in_thread, AsyncValue, Progress, ValueState};
//!
//! let value: Arc<AsyncValue<u64>> = Arc::new(AsyncValue::new_value(0));
//!
//! run_in_thread(&value, Progress::new("computing", true), |progress, value| {
//!     progress.set_fraction(1, 1);
//!     value.set_value(42).expect("worker thread is not notifying");
//! })
//! .expect("value was idle");
//!
//! assert_eq!(value.wait(), ValueState::Value);
//! let mut seen = 0;
//! value.access_value(|v| seen = *v);
//! assert_eq!(seen, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod progress;
pub mod run;
pub mod test_utils;
pub mod value;

pub use error::{AsyncError, CompleteError, DeadlockError, StartError};
pub use progress::{Progress, RerunProgress};
pub use run::{run_in_thread, run_with};
pub use value::runnable::{DeferredRun, RunnableValue};
pub use value::track::{TrackErrors, TrackNothing, TrackPolicy};
pub use value::{AsyncValue, SubscriptionId, ValueState};
