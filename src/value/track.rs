//! Consistency tracking strategies.
//!
//! An [`AsyncValue`](crate::AsyncValue) delivers state-change notifications
//! while holding its serializing lock, so mutating the value from inside one
//! of its own notification callbacks would recursively acquire that lock and
//! hang. A [`TrackPolicy`] detects this reentrancy, and asserts well-formed
//! progress lifecycles, on behalf of the container.
//!
//! Two implementations are provided: [`TrackErrors`] (the default) fails
//! fast on misuse, [`TrackNothing`] costs nothing and checks nothing. The
//! policy is injected at construction via
//! [`AsyncValue::new_value_with`](crate::AsyncValue::new_value_with).

use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::DeadlockError;

/// Strategy for detecting misuse of a value's coordination protocol.
///
/// Hooks marked *fatal* report programmer errors on an assertion channel
/// distinct from the value's own ERROR state: they indicate a bug in the
/// calling code, not a recoverable runtime condition.
pub trait TrackPolicy: Send + Sync {
    /// Called before any mutating operation. Returns [`DeadlockError`] when
    /// the calling thread is currently delivering a state-change
    /// notification for this same value.
    ///
    /// # Errors
    ///
    /// [`DeadlockError`] on self-reentrant mutation.
    fn track_mutation_deadlock(&self) -> Result<(), DeadlockError>;

    /// Marks the calling thread as the notifying thread.
    fn enter_emit(&self);

    /// Clears the notifying-thread mark.
    fn leave_emit(&self);

    /// The value was dropped while an operation was still in progress.
    /// Fatal.
    fn on_destroy_while_in_progress(&self);

    /// A second operation was started while one was in progress. Fatal.
    fn on_start_while_in_progress(&self);

    /// A completion named a progress that is not the active one. Reported,
    /// then ignored: stale completions are reachable in racy-but-correct
    /// adapter code.
    fn on_complete_alien_progress(&self);

    /// A completion arrived with neither a value nor an error staged.
    /// Fatal.
    fn on_incomplete_progress(&self);
}

/// Default tracking policy: detects reentrant mutation and fails fast on
/// lifecycle violations.
#[derive(Debug, Default)]
pub struct TrackErrors {
    emit_thread: Mutex<Option<ThreadId>>,
}

impl TrackPolicy for TrackErrors {
    fn track_mutation_deadlock(&self) -> Result<(), DeadlockError> {
        if *self.emit_thread.lock() == Some(thread::current().id()) {
            return Err(DeadlockError);
        }
        Ok(())
    }

    fn enter_emit(&self) {
        let mut slot = self.emit_thread.lock();
        assert!(
            slot.is_none(),
            "state-change notification entered while already notifying"
        );
        *slot = Some(thread::current().id());
    }

    fn leave_emit(&self) {
        *self.emit_thread.lock() = None;
    }

    fn on_destroy_while_in_progress(&self) {
        if thread::panicking() {
            tracing::error!("value dropped while an operation is in progress");
            return;
        }
        panic!("value dropped while an operation is in progress");
    }

    fn on_start_while_in_progress(&self) {
        panic!("cannot start an operation while another is in progress");
    }

    fn on_complete_alien_progress(&self) {
        tracing::warn!("completion ignored: progress is not the active one");
    }

    fn on_incomplete_progress(&self) {
        panic!("operation completed with neither a value nor an error staged");
    }
}

/// No-op policy: no reentrancy detection, no lifecycle assertions.
///
/// Misuse behaves as the underlying races dictate; in particular a
/// self-reentrant mutation will deadlock for real.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackNothing;

impl TrackPolicy for TrackNothing {
    fn track_mutation_deadlock(&self) -> Result<(), DeadlockError> {
        Ok(())
    }

    fn enter_emit(&self) {}

    fn leave_emit(&self) {}

    fn on_destroy_while_in_progress(&self) {}

    fn on_start_while_in_progress(&self) {}

    fn on_complete_alien_progress(&self) {}

    fn on_incomplete_progress(&self) {}
}

/// RAII bracket around notification delivery.
pub(crate) struct EmitScope<'a> {
    policy: &'a dyn TrackPolicy,
}

impl<'a> EmitScope<'a> {
    pub(crate) fn new(policy: &'a dyn TrackPolicy) -> Self {
        policy.enter_emit();
        Self { policy }
    }
}

impl Drop for EmitScope<'_> {
    fn drop(&mut self) {
        self.policy.leave_emit();
    }
}
