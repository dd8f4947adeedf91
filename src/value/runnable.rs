//! Runnable values with coalesced rerun.
//!
//! A [`RunnableValue`] layers a "request rerun while busy, otherwise defer
//! and run" policy on top of [`AsyncValue`]. A long computation can be told
//! to restart with fresh input instead of queuing a second concurrent run:
//! [`RunnableValue::run`] while busy just flags a rerun on the active
//! [`RerunProgress`] and returns, and the running pass loops again after its
//! current iteration instead of completing.
//!
//! This guarantees that no two computations run concurrently for the same
//! value, that a rerun requested during computation is never lost, and that
//! any number of concurrent `run` calls collapse into at most one extra
//! pass.

use std::ops::Deref;
use std::sync::Arc;

use crate::error::DeadlockError;
use crate::progress::RerunProgress;
use crate::value::{AsyncValue, Completion};

/// A unit of deferred work handed to the scheduling adapter.
pub type DeferredRun = Box<dyn FnOnce() + Send>;

type RunFn<V, E> = Box<dyn Fn(&RerunProgress, &AsyncValue<V, E, RerunProgress>) + Send + Sync>;
type DeferFn = Box<dyn Fn(DeferredRun) + Send + Sync>;
type ProgressFn = Box<dyn Fn() -> RerunProgress + Send + Sync>;

/// An [`AsyncValue`] with an attached computation and rerun coalescing.
///
/// The deferral function decides *where* the computation runs (a thread, a
/// pool task, an event loop); the wrapper only guarantees the single-pass
/// and rerun semantics. Dereferences to the underlying [`AsyncValue`] for
/// `access`/`wait`/`subscribe`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use async_value::RunnableValue;
///
/// let value: Arc<RunnableValue<i32>> = RunnableValue::from_value(
///     0,
///     |pass| pass(), // run deferred work inline
///     |progress, value| {
///         assert!(!progress.stop_requested()); // poll for cooperative stop
///         value.set_value(8).expect("worker is not notifying");
///     },
/// );
/// value.run()?;
/// let mut seen = 0;
/// value.wait_with(|v| seen = *v, |_| ());
/// assert_eq!(seen, 8);
/// # Ok::<(), async_value::DeadlockError>(())
/// ```
pub struct RunnableValue<V, E = crate::error::AsyncError> {
    value: AsyncValue<V, E, RerunProgress>,
    defer_fn: DeferFn,
    run_fn: RunFn<V, E>,
    progress_fn: ProgressFn,
}

impl<V, E> RunnableValue<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Creates a runnable value starting in the VALUE state.
    ///
    /// `defer_fn` receives each pass as a boxed closure and decides where it
    /// executes. `run_fn` is the user computation; it must deposit a value
    /// or an error on every pass (a pass that honors a stop request deposits
    /// the "stopped" error itself).
    pub fn from_value<D, F>(value: V, defer_fn: D, run_fn: F) -> Arc<Self>
    where
        D: Fn(DeferredRun) + Send + Sync + 'static,
        F: Fn(&RerunProgress, &AsyncValue<V, E, RerunProgress>) + Send + Sync + 'static,
    {
        Self::assemble(AsyncValue::new_value(value), defer_fn, run_fn)
    }

    /// Creates a runnable value starting in the ERROR state.
    pub fn from_error<D, F>(error: E, defer_fn: D, run_fn: F) -> Arc<Self>
    where
        D: Fn(DeferredRun) + Send + Sync + 'static,
        F: Fn(&RerunProgress, &AsyncValue<V, E, RerunProgress>) + Send + Sync + 'static,
    {
        Self::assemble(AsyncValue::new_error(error), defer_fn, run_fn)
    }

    /// Wraps an existing value, keeping its state and tracking policy.
    pub fn new<D, F>(value: AsyncValue<V, E, RerunProgress>, defer_fn: D, run_fn: F) -> Arc<Self>
    where
        D: Fn(DeferredRun) + Send + Sync + 'static,
        F: Fn(&RerunProgress, &AsyncValue<V, E, RerunProgress>) + Send + Sync + 'static,
    {
        Self::assemble(value, defer_fn, run_fn)
    }

    fn assemble<D, F>(value: AsyncValue<V, E, RerunProgress>, defer_fn: D, run_fn: F) -> Arc<Self>
    where
        D: Fn(DeferredRun) + Send + Sync + 'static,
        F: Fn(&RerunProgress, &AsyncValue<V, E, RerunProgress>) + Send + Sync + 'static,
    {
        Arc::new(Self {
            value,
            defer_fn: Box::new(defer_fn),
            run_fn: Box::new(run_fn),
            progress_fn: Box::new(|| RerunProgress::new("", true)),
        })
    }

    /// Replaces the per-pass progress factory (message, stop capability).
    ///
    /// # Panics
    ///
    /// Panics when the value has already been shared; set the factory right
    /// after construction.
    #[must_use]
    pub fn with_progress<PF>(self: Arc<Self>, progress_fn: PF) -> Arc<Self>
    where
        PF: Fn() -> RerunProgress + Send + Sync + 'static,
    {
        let Ok(mut this) = Arc::try_unwrap(self) else {
            panic!("progress factory must be set before the value is shared");
        };
        this.progress_fn = Box::new(progress_fn);
        Arc::new(this)
    }

    /// Computes (or recomputes) the value.
    ///
    /// If an operation is already in progress this only flags a rerun on its
    /// progress and returns: the running pass will execute once more instead
    /// of completing. Otherwise the pass is handed to the deferral function.
    /// Concurrent calls coalesce; the decision is taken under the
    /// serializing lock, so a call racing a completion either lands its
    /// rerun flag before the final check or defers a fresh pass against the
    /// committed terminal state.
    ///
    /// # Errors
    ///
    /// [`DeadlockError`] when called from a state-change notification
    /// callback of this value.
    pub fn run(self: &Arc<Self>) -> Result<(), DeadlockError> {
        let coalesced = self
            .value
            .coalesce_if_in_progress(RerunProgress::request_rerun)?;
        if coalesced {
            tracing::trace!("run coalesced into rerun request");
            return Ok(());
        }

        let this = Arc::clone(self);
        (self.defer_fn)(Box::new(move || this.run_pass()));
        Ok(())
    }

    /// One deferred pass: start (or coalesce into a pass that won the
    /// race), then loop the computation until no rerun is pending at
    /// completion.
    fn run_pass(&self) {
        let progress = Arc::new((self.progress_fn)());
        let started = self
            .value
            .start_progress_or_coalesce(&progress, RerunProgress::request_rerun);
        if !started {
            tracing::trace!("pass coalesced into the active run");
            return;
        }

        loop {
            (self.run_fn)(&progress, &self.value);
            match self
                .value
                .complete_progress_or_rerun(&progress, RerunProgress::reset_if_rerun_requested)
            {
                Completion::Settled(state) => {
                    tracing::debug!(state = ?state, "run settled");
                    break;
                }
                Completion::Rerun => {
                    tracing::debug!("rerun requested, computing again");
                }
                Completion::Failed(error) => {
                    // reachable only under a no-op tracking policy with a
                    // computation that staged nothing
                    tracing::error!(error = %error, "pass failed to complete");
                    break;
                }
            }
        }
    }

    /// The underlying value.
    #[must_use]
    pub fn value(&self) -> &AsyncValue<V, E, RerunProgress> {
        &self.value
    }
}

impl<V, E> Deref for RunnableValue<V, E> {
    type Target = AsyncValue<V, E, RerunProgress>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<V, E> std::fmt::Debug for RunnableValue<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableValue")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AsyncError;
    use crate::test_utils::init_test_logging;
    use crate::value::ValueState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runs deferred passes inline on the calling thread.
    fn inline(run: DeferredRun) {
        run();
    }

    #[test]
    fn run_computes_a_fresh_value() {
        init_test_logging();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let value: Arc<RunnableValue<i32>> = RunnableValue::from_value(8, inline, move |_, value| {
            counted.fetch_add(1, Ordering::SeqCst);
            value.set_value(13).expect("worker thread never notifies");
        });

        value.run().expect("not in a notification");
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let mut seen = 0;
        assert_eq!(value.wait_with(|v| seen = *v, |_| ()), ValueState::Value);
        assert_eq!(seen, 13);
    }

    #[test]
    fn rerun_requested_mid_pass_runs_again() {
        init_test_logging();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let value: Arc<RunnableValue<usize, AsyncError>> =
            RunnableValue::from_value(0, inline, move |progress, value| {
                let pass = counted.fetch_add(1, Ordering::SeqCst);
                if pass == 0 {
                    // simulate a run() arriving while the computation executes
                    progress.request_rerun();
                }
                value.set_value(pass).expect("worker never notifies");
            });

        value.run().expect("not in a notification");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let mut seen = usize::MAX;
        value.wait_with(|v| seen = *v, |_| ());
        assert_eq!(seen, 1, "final value comes from the rerun pass");
    }

    /// Runs deferred passes on a fresh thread.
    fn threaded(run: DeferredRun) {
        std::thread::spawn(run);
    }

    #[test]
    fn stop_request_settles_in_error() {
        init_test_logging();
        let value: Arc<RunnableValue<i32>> =
            RunnableValue::from_value(8, threaded, |progress, value| {
                while !progress.stop_requested() {
                    std::thread::sleep(std::time::Duration::from_millis(2));
                }
                value.set_error(AsyncError::stopped()).expect("worker");
            });

        value.run().expect("not in a notification");
        while value.state() != ValueState::Progress {
            std::thread::yield_now();
        }

        let mut message = String::new();
        assert_eq!(
            value.stop_and_wait(),
            ValueState::Error,
            "a bare stop ends in ERROR, not VALUE"
        );
        assert!(value.access_error(|e| message = e.message().to_string()));
        assert_eq!(message, "stopped by request");
    }

    #[test]
    fn progress_factory_customizes_passes() {
        init_test_logging();
        let messages = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&messages);
        let value: Arc<RunnableValue<i32>> = RunnableValue::from_value(
            0,
            inline,
            move |progress, value| {
                seen.lock().push(progress.message());
                value.set_value(1).expect("worker");
            },
        )
        .with_progress(|| RerunProgress::new("recalculating", false));

        value.run().expect("not in a notification");
        assert_eq!(*messages.lock(), vec!["recalculating".to_string()]);
    }
}
