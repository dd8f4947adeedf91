//! Scheduling adapters.
//!
//! An adapter obtains a worker context somewhere (a dedicated thread here, a
//! pool task or a network callback through [`run_with`]) and brackets it
//! with the start/complete-progress calls. The container does not care
//! where the work runs; the adapter contract is what matters:
//!
//! - exactly one [`complete_progress`](crate::AsyncValue::complete_progress)
//!   per successful [`start_progress`](crate::AsyncValue::start_progress),
//!   on any thread, passing the same `Arc` identity;
//! - the computation deposits a value or an error before returning (a pass
//!   that honors a stop request deposits the "stopped" error itself);
//! - the computation polls [`Progress::stop_requested`] if it wants to honor
//!   cooperative cancellation.

use std::sync::Arc;
use std::thread;

use crate::error::StartError;
use crate::progress::Progress;
use crate::value::AsyncValue;

/// Starts `progress` on `value` and runs `func` on a dedicated thread,
/// completing the progress when it returns.
///
/// # Errors
///
/// Propagates the [`StartError`] when the value is already in progress (no
/// thread is spawned) or the start was issued from a notification callback.
pub fn run_in_thread<V, E, P, F>(
    value: &Arc<AsyncValue<V, E, P>>,
    progress: P,
    func: F,
) -> Result<(), StartError>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: AsRef<Progress> + Send + Sync + 'static,
    F: FnOnce(&P, &AsyncValue<V, E, P>) + Send + 'static,
{
    let progress = Arc::new(progress);
    value.start_progress(&progress)?;

    let value = Arc::clone(value);
    thread::spawn(move || {
        func(&progress, &value);
        if let Err(error) = value.complete_progress(&progress) {
            tracing::error!(error = %error, "completion failed after dedicated-thread run");
        }
    });
    Ok(())
}

/// Starts `progress` on `value` and hands the bracketed computation to a
/// caller-supplied spawner.
///
/// The spawner decides where the work runs: submit to a pool, queue behind a
/// network reply, anything that eventually invokes the closure exactly once.
///
/// # Errors
///
/// Propagates the [`StartError`]; the spawner is not invoked on failure.
pub fn run_with<V, E, P, S, F>(
    spawn: S,
    value: &Arc<AsyncValue<V, E, P>>,
    progress: P,
    func: F,
) -> Result<(), StartError>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    P: AsRef<Progress> + Send + Sync + 'static,
    S: FnOnce(Box<dyn FnOnce() + Send>),
    F: FnOnce(&P, &AsyncValue<V, E, P>) + Send + 'static,
{
    let progress = Arc::new(progress);
    value.start_progress(&progress)?;

    let value = Arc::clone(value);
    spawn(Box::new(move || {
        func(&progress, &value);
        if let Err(error) = value.complete_progress(&progress) {
            tracing::error!(error = %error, "completion failed after spawned run");
        }
    }));
    Ok(())
}
