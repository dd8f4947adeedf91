//! The tri-state value container.
//!
//! An [`AsyncValue`] holds exactly one of a computed value, an error, or a
//! reference to an in-flight progress-reporting operation. It is observable
//! and waitable from multiple threads.
//!
//! # Locking discipline
//!
//! Two nested locks protect shared state. The outer serializing lock orders
//! all mutating operations, including the full duration of notification
//! dispatch. The inner content lock guards only the tagged union itself and
//! is held just across the swap, so readers never block behind a slow
//! notification handler. Blocked waiters park on a broadcast condition tied
//! to the outer lock and re-check their predicate in a loop.
//!
//! # Guarantees
//!
//! - The observable state is always exactly one of VALUE, ERROR, PROGRESS;
//!   the populated content always matches the state tag.
//! - A completion's notification is delivered only after the staged content
//!   is committed, so any waiter woken by it observes a terminal state.
//! - All waiters on a given completion are released together.
//! - Self-reentrant mutation from a notification callback is detected by
//!   the injected [`TrackPolicy`] and surfaced as a
//!   [`DeadlockError`](crate::DeadlockError) instead of hanging.
//!
//! # Example
//!
//! ```
//! use async_value::{AsyncError, AsyncValue};
//!
//! let value: AsyncValue<i32> = AsyncValue::new_value(8);
//! let mut seen = 0;
//! assert!(value.access_value(|v| seen = *v));
//! assert_eq!(seen, 8);
//!
//! value.set_error(AsyncError::new("gone"))?;
//! assert!(!value.access_value(|_| ()));
//! # Ok::<(), async_value::DeadlockError>(())
//! ```

pub mod runnable;
pub mod track;

use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{AsyncError, CompleteError, DeadlockError, StartError};
use crate::progress::Progress;
use crate::value::track::{EmitScope, TrackErrors, TrackPolicy};

/// Coarse observable state of an [`AsyncValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueState {
    /// A computed value is present.
    Value,
    /// An error is present.
    Error,
    /// An operation is running; a result may already be staged.
    Progress,
}

/// Identity of a state-change subscription, for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A settled result: the value or error branch.
#[derive(Debug)]
enum Settled<V, E> {
    Value(V),
    Error(E),
}

/// The tagged union behind the inner content lock. Invalid combinations
/// (two branches populated at once, progress without the Progress tag) are
/// unrepresentable.
#[derive(Debug)]
enum Content<V, E, P> {
    Value(V),
    Error(E),
    Progress {
        active: Arc<P>,
        /// Result deposited during the progress window, if any. Committed
        /// by the matching completion.
        staged: Option<Settled<V, E>>,
    },
}

impl<V, E, P> Content<V, E, P> {
    fn state(&self) -> ValueState {
        match self {
            Self::Value(_) => ValueState::Value,
            Self::Error(_) => ValueState::Error,
            Self::Progress { .. } => ValueState::Progress,
        }
    }
}

type StateCallback = Box<dyn Fn(ValueState) + Send + Sync>;

struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, StateCallback)>,
}

/// Outcome of a completion attempt, including the rerun branch used by the
/// runnable wrapper.
pub(crate) enum Completion {
    Settled(ValueState),
    Rerun,
    Failed(CompleteError),
}

/// Concurrency-safe container holding a value, an error, or an in-flight
/// operation.
///
/// `V` is the value type, `E` the domain error type, `P` the progress type
/// (anything embedding a [`Progress`]). Progress objects are shared as
/// `Arc<P>`: the scheduling adapter that starts an operation keeps ownership
/// and the container holds a clone while the operation is active; completion
/// is matched by `Arc` identity.
pub struct AsyncValue<V, E = AsyncError, P = Progress> {
    track: Box<dyn TrackPolicy>,
    /// Outer serializing lock. Held across every mutation including
    /// notification dispatch; the condvar for waiters is tied to it.
    write_lock: Mutex<()>,
    waiters: Condvar,
    /// Inner fast lock. Held only across content swaps and reads.
    content: RwLock<Content<V, E, P>>,
    listeners: Mutex<Listeners>,
}

impl<V, E, P: AsRef<Progress>> AsyncValue<V, E, P> {
    /// Creates a value in the VALUE state with the default tracking policy.
    #[must_use]
    pub fn new_value(value: V) -> Self {
        Self::new_value_with(value, TrackErrors::default())
    }

    /// Creates a value in the VALUE state with an explicit tracking policy.
    #[must_use]
    pub fn new_value_with(value: V, track: impl TrackPolicy + 'static) -> Self {
        Self::with_content(Content::Value(value), track)
    }

    /// Creates a value in the ERROR state with the default tracking policy.
    #[must_use]
    pub fn new_error(error: E) -> Self {
        Self::new_error_with(error, TrackErrors::default())
    }

    /// Creates a value in the ERROR state with an explicit tracking policy.
    #[must_use]
    pub fn new_error_with(error: E, track: impl TrackPolicy + 'static) -> Self {
        Self::with_content(Content::Error(error), track)
    }

    /// The embedded [`Progress`] of a progress record. Written as an
    /// associated fn so `&Arc<P>` callers coerce to `&P` instead of hitting
    /// `Arc`'s own `AsRef` impl.
    fn base(progress: &P) -> &Progress {
        progress.as_ref()
    }

    fn with_content(content: Content<V, E, P>, track: impl TrackPolicy + 'static) -> Self {
        Self {
            track: Box::new(track),
            write_lock: Mutex::new(()),
            waiters: Condvar::new(),
            content: RwLock::new(content),
            listeners: Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// Returns the current coarse state.
    #[must_use]
    pub fn state(&self) -> ValueState {
        self.content.read().state()
    }

    /// Replaces the content with a value and settles in the VALUE state.
    ///
    /// While an operation is in progress the value is only *staged*: the
    /// observable state stays PROGRESS (and no notification fires) until the
    /// matching completion commits it. Outside of progress the previous
    /// content is discarded, listeners are notified and all waiters wake.
    ///
    /// # Errors
    ///
    /// [`DeadlockError`] when called from the thread currently delivering a
    /// state-change notification for this value.
    pub fn set_value(&self, value: V) -> Result<(), DeadlockError> {
        self.settle(Settled::Value(value))
    }

    /// Replaces the content with an error and settles in the ERROR state.
    ///
    /// Staging and notification behave as in [`set_value`](Self::set_value).
    ///
    /// # Errors
    ///
    /// [`DeadlockError`] when called from the thread currently delivering a
    /// state-change notification for this value.
    pub fn set_error(&self, error: E) -> Result<(), DeadlockError> {
        self.settle(Settled::Error(error))
    }

    fn settle(&self, settled: Settled<V, E>) -> Result<(), DeadlockError> {
        self.track.track_mutation_deadlock()?;

        let new_state = match &settled {
            Settled::Value(_) => ValueState::Value,
            Settled::Error(_) => ValueState::Error,
        };
        let mut displaced = None;
        let mut displaced_staged = None;

        let guard = self.write_lock.lock();
        let staged_only = {
            let mut content = self.content.write();
            match &mut *content {
                Content::Progress { staged, .. } => {
                    displaced_staged = staged.replace(settled);
                    true
                }
                slot => {
                    let replacement = match settled {
                        Settled::Value(value) => Content::Value(value),
                        Settled::Error(error) => Content::Error(error),
                    };
                    displaced = Some(mem::replace(slot, replacement));
                    false
                }
            }
        };
        if staged_only {
            tracing::trace!(state = ?new_state, "result staged during progress");
        } else {
            self.emit_state_changed(new_state);
            self.waiters.notify_all();
        }
        drop(guard);

        // displaced content dropped here, outside the locks, so arbitrary
        // user Drop impls cannot re-enter them
        drop(displaced);
        drop(displaced_staged);
        Ok(())
    }

    /// Installs `progress` and enters the PROGRESS state.
    ///
    /// The previous value or error is discarded. The caller keeps ownership
    /// of the progress for the duration and must call
    /// [`complete_progress`](Self::complete_progress) exactly once with the
    /// same `Arc` identity.
    ///
    /// # Errors
    ///
    /// [`StartError::AlreadyInProgress`] when an operation is already
    /// running (the tracking policy reports the violation first);
    /// [`StartError::Deadlock`] when called from a notification callback.
    pub fn start_progress(&self, progress: &Arc<P>) -> Result<(), StartError> {
        self.track.track_mutation_deadlock()?;

        let displaced;
        let guard = self.write_lock.lock();
        {
            let mut content = self.content.write();
            if matches!(&*content, Content::Progress { .. }) {
                drop(content);
                drop(guard);
                self.track.on_start_while_in_progress();
                return Err(StartError::AlreadyInProgress);
            }
            Self::base(progress).begin_use();
            displaced = mem::replace(
                &mut *content,
                Content::Progress {
                    active: Arc::clone(progress),
                    staged: None,
                },
            );
        }
        tracing::debug!("progress started");
        self.emit_state_changed(ValueState::Progress);
        drop(guard);
        drop(displaced);
        Ok(())
    }

    /// Retires `progress` and commits the staged result.
    ///
    /// Returns the terminal state. The notification is delivered only after
    /// the staged content is committed, and all blocked waiters are released
    /// together afterwards.
    ///
    /// # Errors
    ///
    /// [`CompleteError::Alien`] when `progress` is not the active one (the
    /// state is unaffected); [`CompleteError::Incomplete`] when no value or
    /// error was staged during the window. The tracking policy treats an
    /// incomplete completion as fatal and panics before this returns.
    pub fn complete_progress(&self, progress: &Arc<P>) -> Result<ValueState, CompleteError> {
        match self.complete_progress_or_rerun(progress, |_| false) {
            Completion::Settled(state) => Ok(state),
            Completion::Failed(error) => Err(error),
            Completion::Rerun => unreachable!("rerun is never pending for a plain completion"),
        }
    }

    /// Completes unless `rerun_pending` consumes a pending rerun request.
    ///
    /// The rerun check runs under the outer lock, atomically with the
    /// commit, so a rerun flagged by a racing caller is either consumed here
    /// (the pass loops again) or arrives after the terminal state is
    /// visible.
    pub(crate) fn complete_progress_or_rerun<F>(&self, progress: &Arc<P>, rerun_pending: F) -> Completion
    where
        F: FnOnce(&P) -> bool,
    {
        let guard = self.write_lock.lock();
        {
            let content = self.content.read();
            let is_active = matches!(
                &*content, Content::Progress { active, .. } if Arc::ptr_eq(active, progress)
            );
            if !is_active {
                drop(content);
                drop(guard);
                self.track.on_complete_alien_progress();
                return Completion::Failed(CompleteError::Alien);
            }
        }

        if rerun_pending(progress) {
            tracing::debug!("rerun pending at completion, pass continues");
            return Completion::Rerun;
        }

        let committed = {
            let mut content = self.content.write();
            let staged = match &mut *content {
                Content::Progress { staged, .. } => staged.take(),
                // outer lock held since the identity check
                _ => None,
            };
            match staged {
                None => None,
                Some(Settled::Value(value)) => {
                    *content = Content::Value(value);
                    Some(ValueState::Value)
                }
                Some(Settled::Error(error)) => {
                    *content = Content::Error(error);
                    Some(ValueState::Error)
                }
            }
        };
        let Some(new_state) = committed else {
            drop(guard);
            self.track.on_incomplete_progress();
            return Completion::Failed(CompleteError::Incomplete);
        };

        Self::base(progress).end_use();
        tracing::debug!(state = ?new_state, "progress completed");
        self.emit_state_changed(new_state);
        self.waiters.notify_all();
        drop(guard);
        Completion::Settled(new_state)
    }

    /// Starts `progress`, or coalesces into the already-active operation.
    ///
    /// Runs under the outer lock so it cannot interleave with a completion:
    /// either the active progress receives `coalesce` before its final rerun
    /// check, or the terminal state is already committed and the start
    /// succeeds.
    pub(crate) fn start_progress_or_coalesce<F>(&self, progress: &Arc<P>, coalesce: F) -> bool
    where
        F: FnOnce(&P),
    {
        let displaced;
        let guard = self.write_lock.lock();
        {
            let mut content = self.content.write();
            match &mut *content {
                Content::Progress { active, .. } => {
                    let active = Arc::clone(active);
                    drop(content);
                    coalesce(&active);
                    return false;
                }
                slot => {
                    Self::base(progress).begin_use();
                    displaced = mem::replace(
                        slot,
                        Content::Progress {
                            active: Arc::clone(progress),
                            staged: None,
                        },
                    );
                }
            }
        }
        tracing::debug!("progress started");
        self.emit_state_changed(ValueState::Progress);
        drop(guard);
        drop(displaced);
        true
    }

    /// Runs `coalesce` against the active progress, if any.
    ///
    /// Held under the outer lock for the same reason as
    /// [`start_progress_or_coalesce`](Self::start_progress_or_coalesce).
    pub(crate) fn coalesce_if_in_progress<F>(&self, coalesce: F) -> Result<bool, DeadlockError>
    where
        F: FnOnce(&P),
    {
        self.track.track_mutation_deadlock()?;
        let _guard = self.write_lock.lock();
        let content = self.content.read();
        if let Content::Progress { active, .. } = &*content {
            coalesce(active);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Dispatches to exactly one callback matching the current state, under
    /// the read lock, and returns which branch fired.
    pub fn access<FV, FE, FP>(&self, on_value: FV, on_error: FE, on_progress: FP) -> ValueState
    where
        FV: FnOnce(&V),
        FE: FnOnce(&E),
        FP: FnOnce(&P),
    {
        let content = self.content.read();
        match &*content {
            Content::Value(value) => {
                on_value(value);
                ValueState::Value
            }
            Content::Error(error) => {
                on_error(error);
                ValueState::Error
            }
            Content::Progress { active, .. } => {
                on_progress(active);
                ValueState::Progress
            }
        }
    }

    /// Dispatches to the value or error callback. Returns `false`, invoking
    /// neither, while in progress.
    pub fn access_outcome<FV, FE>(&self, on_value: FV, on_error: FE) -> bool
    where
        FV: FnOnce(&V),
        FE: FnOnce(&E),
    {
        let content = self.content.read();
        match &*content {
            Content::Value(value) => {
                on_value(value);
                true
            }
            Content::Error(error) => {
                on_error(error);
                true
            }
            Content::Progress { .. } => false,
        }
    }

    /// Invokes the callback with the value, if in the VALUE state.
    pub fn access_value<F: FnOnce(&V)>(&self, on_value: F) -> bool {
        let content = self.content.read();
        if let Content::Value(value) = &*content {
            on_value(value);
            true
        } else {
            false
        }
    }

    /// Invokes the callback with the error, if in the ERROR state.
    pub fn access_error<F: FnOnce(&E)>(&self, on_error: F) -> bool {
        let content = self.content.read();
        if let Content::Error(error) = &*content {
            on_error(error);
            true
        } else {
            false
        }
    }

    /// Invokes the callback with the active progress, if in the PROGRESS
    /// state.
    pub fn access_progress<F: FnOnce(&P)>(&self, on_progress: F) -> bool {
        let content = self.content.read();
        if let Content::Progress { active, .. } = &*content {
            on_progress(active);
            true
        } else {
            false
        }
    }

    /// Blocks until the state becomes VALUE or ERROR, then invokes the
    /// matching callback before returning.
    ///
    /// Already-settled values return on the fast path without touching the
    /// serializing lock. Parked waiters tolerate spurious wakeups by
    /// re-checking the predicate in a loop; any number of threads may wait
    /// concurrently and a completion releases them all.
    ///
    /// Must not be called from a state-change notification callback: the
    /// notifying thread holds the lock this parks on.
    pub fn wait_with<FV, FE>(&self, on_value: FV, on_error: FE) -> ValueState
    where
        FV: FnOnce(&V),
        FE: FnOnce(&E),
    {
        let mut on_value = Some(on_value);
        let mut on_error = Some(on_error);

        {
            let content = self.content.read();
            if let Some(state) = Self::dispatch_settled(&content, &mut on_value, &mut on_error) {
                return state;
            }
        }

        tracing::trace!("waiter parked");
        let mut guard = self.write_lock.lock();
        loop {
            {
                let content = self.content.read();
                if let Some(state) = Self::dispatch_settled(&content, &mut on_value, &mut on_error)
                {
                    tracing::trace!(state = ?state, "waiter released");
                    return state;
                }
            }
            self.waiters.wait(&mut guard);
        }
    }

    /// Blocks until the state becomes VALUE or ERROR.
    pub fn wait(&self) -> ValueState {
        self.wait_with(|_| (), |_| ())
    }

    /// Requests a stop on the active operation, if any, then waits for a
    /// terminal state.
    pub fn stop_and_wait(&self) -> ValueState {
        self.access_progress(|progress| progress.as_ref().request_stop());
        self.wait()
    }

    fn dispatch_settled<FV, FE>(
        content: &Content<V, E, P>,
        on_value: &mut Option<FV>,
        on_error: &mut Option<FE>,
    ) -> Option<ValueState>
    where
        FV: FnOnce(&V),
        FE: FnOnce(&E),
    {
        match content {
            Content::Value(value) => {
                if let Some(callback) = on_value.take() {
                    callback(value);
                }
                Some(ValueState::Value)
            }
            Content::Error(error) => {
                if let Some(callback) = on_error.take() {
                    callback(error);
                }
                Some(ValueState::Error)
            }
            Content::Progress { .. } => None,
        }
    }

    /// Registers a state-change callback.
    ///
    /// Callbacks run synchronously on the mutating thread, under the
    /// serializing lock, once per observable state change, and receive the
    /// new coarse state tag. Mutating this same value from inside a callback
    /// is detected by the tracking policy and rejected with a
    /// [`DeadlockError`](crate::DeadlockError).
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ValueState) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = SubscriptionId(listeners.next_id);
        listeners.entries.push((id, Box::new(callback)));
        id
    }

    /// Removes a previously registered callback. Returns whether it was
    /// still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    fn emit_state_changed(&self, state: ValueState) {
        let _scope = EmitScope::new(&*self.track);
        let listeners = self.listeners.lock();
        tracing::trace!(state = ?state, listeners = listeners.entries.len(), "state changed");
        for (_, callback) in &listeners.entries {
            callback(state);
        }
    }
}

impl<V, E, P> fmt::Debug for AsyncValue<V, E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue")
            .field("state", &self.content.read().state())
            .finish_non_exhaustive()
    }
}

impl<V, E, P> Drop for AsyncValue<V, E, P> {
    fn drop(&mut self) {
        if matches!(&*self.content.get_mut(), Content::Progress { .. }) {
            self.track.on_destroy_while_in_progress();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AsyncError;
    use crate::test_utils::init_test_logging;
    use crate::value::track::TrackNothing;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};

    type TestValue = AsyncValue<i32>;

    #[test]
    fn initial_value_dispatches_to_value_branch() {
        init_test_logging();
        let value = TestValue::new_value(8);

        let mut seen = 0;
        assert!(value.access_value(|v| seen = *v));
        assert_eq!(seen, 8);
        assert!(!value.access_error(|_| ()));
        assert!(!value.access_progress(|_| ()));
        assert_eq!(value.state(), ValueState::Value);
    }

    #[test]
    fn initial_error_dispatches_to_error_branch() {
        init_test_logging();
        let value: TestValue = AsyncValue::new_error(AsyncError::new("no value"));

        let mut message = String::new();
        assert!(value.access_error(|e| message = e.message().to_string()));
        assert_eq!(message, "no value");
        assert!(!value.access_value(|_| ()));
        assert_eq!(value.state(), ValueState::Error);
    }

    #[test]
    fn access_fires_exactly_one_callback() {
        init_test_logging();
        let value = TestValue::new_value(3);
        let fired = AtomicUsize::new(0);
        let state = value.access(
            |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            },
            |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            },
            |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(state, ValueState::Value);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_replaces_old_content() {
        init_test_logging();
        let value = TestValue::new_value(1);
        value.set_value(2).expect("not in a notification");

        let mut seen = 0;
        assert!(value.access_value(|v| seen = *v));
        assert_eq!(seen, 2);

        value
            .set_error(AsyncError::new("gone"))
            .expect("not in a notification");
        assert!(!value.access_value(|_| ()));
        assert!(value.access_error(|_| ()));
    }

    #[test]
    fn start_installs_progress_and_discards_content() {
        init_test_logging();
        let value = TestValue::new_value(1);
        let progress = Arc::new(Progress::new("load", true));

        value.start_progress(&progress).expect("idle value");
        assert_eq!(value.state(), ValueState::Progress);
        assert!(!value.access_value(|_| ()));

        value.set_value(5).expect("not in a notification");
        // still in progress: the result is only staged
        assert_eq!(value.state(), ValueState::Progress);

        let state = value.complete_progress(&progress).expect("staged value");
        assert_eq!(state, ValueState::Value);
        let mut seen = 0;
        assert!(value.access_value(|v| seen = *v));
        assert_eq!(seen, 5);
    }

    #[test]
    fn start_while_in_progress_fails_without_mutating() {
        init_test_logging();
        let value: TestValue = AsyncValue::new_value_with(1, TrackNothing);
        let first = Arc::new(Progress::new("first", true));
        let second = Arc::new(Progress::new("second", true));

        value.start_progress(&first).expect("idle value");
        assert_eq!(
            value.start_progress(&second),
            Err(StartError::AlreadyInProgress)
        );

        // the first progress is still the active one
        let mut active_message = String::new();
        assert!(value.access_progress(|p| active_message = p.message()));
        assert_eq!(active_message, "first");

        value.set_error(AsyncError::new("done")).expect("no emit");
        value.complete_progress(&first).expect("staged error");
    }

    #[test]
    fn alien_completion_is_a_no_op() {
        init_test_logging();
        let value: TestValue = AsyncValue::new_value_with(1, TrackNothing);
        let active = Arc::new(Progress::new("active", true));
        let alien = Arc::new(Progress::new("alien", true));

        value.start_progress(&active).expect("idle value");
        value.set_value(9).expect("no emit");

        assert_eq!(
            value.complete_progress(&alien),
            Err(CompleteError::Alien)
        );
        assert_eq!(value.state(), ValueState::Progress);

        assert_eq!(
            value.complete_progress(&active),
            Ok(ValueState::Value)
        );
        // stale duplicate completion after retirement is alien too
        assert_eq!(
            value.complete_progress(&active),
            Err(CompleteError::Alien)
        );
    }

    #[test]
    fn incomplete_completion_is_reported_under_no_op_policy() {
        init_test_logging();
        let value: TestValue = AsyncValue::new_value_with(1, TrackNothing);
        let progress = Arc::new(Progress::new("load", true));

        value.start_progress(&progress).expect("idle value");
        assert_eq!(
            value.complete_progress(&progress),
            Err(CompleteError::Incomplete)
        );
        // nothing was committed
        assert_eq!(value.state(), ValueState::Progress);

        value.set_value(2).expect("no emit");
        value.complete_progress(&progress).expect("staged value");
    }

    #[test]
    #[should_panic(expected = "neither a value nor an error staged")]
    fn incomplete_completion_is_fatal_under_tracking_policy() {
        init_test_logging();
        let value = TestValue::new_value(1);
        let progress = Arc::new(Progress::new("load", true));

        value.start_progress(&progress).expect("idle value");
        let _ = value.complete_progress(&progress);
    }

    #[test]
    fn notification_carries_new_state() {
        init_test_logging();
        let value = TestValue::new_value(1);
        let states = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let log = Arc::clone(&states);
        let id = value.subscribe(move |state| log.lock().push(state));

        let progress = Arc::new(Progress::new("load", true));
        value.start_progress(&progress).expect("idle value");
        value.set_value(2).expect("staging does not notify");
        value.complete_progress(&progress).expect("staged value");

        assert_eq!(
            *states.lock(),
            vec![ValueState::Progress, ValueState::Value]
        );

        assert!(value.unsubscribe(id));
        assert!(!value.unsubscribe(id));
        value.set_value(3).expect("not in a notification");
        // unsubscribed: no further notifications recorded
        assert_eq!(states.lock().len(), 2);
    }

    #[test]
    fn mutation_from_notification_callback_is_rejected() {
        init_test_logging();
        let value = Arc::new(TestValue::new_value(1));
        let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let weak: Weak<TestValue> = Arc::downgrade(&value);
        let results = Arc::clone(&observed);
        value.subscribe(move |_| {
            if let Some(value) = weak.upgrade() {
                results.lock().push(value.set_value(99));
            }
        });

        value.set_value(2).expect("outer call is legal");
        value.set_value(3).expect("outer call is legal");

        // deterministic on every delivery
        assert_eq!(
            *observed.lock(),
            vec![Err(DeadlockError), Err(DeadlockError)]
        );
        let mut seen = 0;
        assert!(value.access_value(|v| seen = *v));
        assert_eq!(seen, 3);
    }

    #[test]
    fn wait_returns_immediately_when_settled() {
        init_test_logging();
        let value = TestValue::new_value(4);
        let mut seen = 0;
        let state = value.wait_with(|v| seen = *v, |_| ());
        assert_eq!(state, ValueState::Value);
        assert_eq!(seen, 4);
        assert_eq!(value.stop_and_wait(), ValueState::Value);
    }

    #[test]
    fn waiter_blocks_until_completion() {
        init_test_logging();
        let value = Arc::new(TestValue::new_value(0));
        let progress = Arc::new(Progress::new("load", true));
        value.start_progress(&progress).expect("idle value");

        let waiter_value = Arc::clone(&value);
        let waiter = std::thread::spawn(move || {
            let mut seen = 0;
            let state = waiter_value.wait_with(|v| seen = *v, |_| ());
            (state, seen)
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        value.set_value(42).expect("no emit");
        value.complete_progress(&progress).expect("staged value");

        let (state, seen) = waiter.join().expect("waiter panicked");
        assert_eq!(state, ValueState::Value);
        assert_eq!(seen, 42);
    }

    #[test]
    fn debug_shows_state() {
        init_test_logging();
        let value = TestValue::new_value(1);
        let rendered = format!("{value:?}");
        assert!(rendered.contains("Value"));
    }
}
