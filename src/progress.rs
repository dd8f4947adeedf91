//! Progress records for in-flight operations.
//!
//! A [`Progress`] describes one running operation: a human-readable message,
//! a fractional completion ratio, and a cooperative stop flag. The initiator
//! of the operation owns it (as an `Arc`) and the value container holds a
//! reference only while the operation is active.
//!
//! [`RerunProgress`] extends the record with a rerun-request flag for the
//! coalesced-rerun wrapper: a rerun implies a stop of the current pass
//! followed by an automatic restart with the same record.
//!
//! # Cancellation
//!
//! Cancellation is cooperative only. [`Progress::request_stop`] sets a
//! monotonic flag that the running computation must poll; nothing preempts a
//! computation that ignores it.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Mutable record of a running operation's status.
#[derive(Debug)]
pub struct Progress {
    state: Mutex<ProgressState>,
    can_request_stop: bool,
    stop_requested: AtomicBool,
    /// Lifecycle bit toggled by the owning container at start/complete.
    in_use: AtomicBool,
}

#[derive(Debug)]
struct ProgressState {
    message: String,
    ratio: f32,
}

impl Progress {
    /// Creates a progress record with an initial message.
    ///
    /// `can_request_stop` is a capability hint fixed at creation, intended
    /// for presentation layers deciding whether to offer a stop control. It
    /// does not gate [`request_stop`](Self::request_stop) itself.
    #[must_use]
    pub fn new(message: impl Into<String>, can_request_stop: bool) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                message: message.into(),
                ratio: 0.0,
            }),
            can_request_stop,
            stop_requested: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
        }
    }

    /// Returns the current status message.
    #[must_use]
    pub fn message(&self) -> String {
        self.state.lock().message.clone()
    }

    /// Returns the completion ratio in `0.0..=1.0`.
    #[must_use]
    pub fn ratio(&self) -> f32 {
        self.state.lock().ratio
    }

    /// Whether the operation advertised stop support at creation.
    #[must_use]
    pub const fn can_request_stop(&self) -> bool {
        self.can_request_stop
    }

    /// Whether a stop has been requested. The flag is monotonic.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Replaces the status message.
    pub fn set_message(&self, message: impl Into<String>) {
        self.state.lock().message = message.into();
    }

    /// Sets the completion ratio, clamped to `0.0..=1.0`.
    pub fn set_ratio(&self, ratio: f32) {
        self.state.lock().ratio = ratio.clamp(0.0, 1.0);
    }

    /// Derives the completion ratio from a current/total pair.
    ///
    /// A `total` of zero yields `0.0` rather than dividing by zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_fraction(&self, current: u64, total: u64) {
        let ratio = if total == 0 {
            0.0
        } else {
            current as f32 / total as f32
        };
        self.set_ratio(ratio);
    }

    /// Requests a cooperative stop. Monotonic: never unset through the
    /// public interface.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub(crate) fn begin_use(&self) {
        let was_in_use = self.in_use.swap(true, Ordering::SeqCst);
        debug_assert!(!was_in_use, "progress is already in use");
    }

    pub(crate) fn end_use(&self) {
        let was_in_use = self.in_use.swap(false, Ordering::SeqCst);
        debug_assert!(was_in_use, "progress was not in use");
    }
}

impl AsRef<Progress> for Progress {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                !self.in_use.load(Ordering::SeqCst),
                "progress dropped while still installed in a value"
            );
        }
    }
}

/// Progress record for rerun-capable operations.
///
/// Dereferences to [`Progress`] for the message/ratio/stop interface.
#[derive(Debug)]
pub struct RerunProgress {
    inner: Progress,
    rerun_requested: AtomicBool,
}

impl RerunProgress {
    /// Creates a rerun-capable progress record.
    #[must_use]
    pub fn new(message: impl Into<String>, can_request_stop: bool) -> Self {
        Self {
            inner: Progress::new(message, can_request_stop),
            rerun_requested: AtomicBool::new(false),
        }
    }

    /// Requests that the operation restart with fresh input.
    ///
    /// A rerun is stop-then-restart, so this also requests a stop of the
    /// current pass.
    pub fn request_rerun(&self) {
        self.rerun_requested.store(true, Ordering::SeqCst);
        self.inner.request_stop();
    }

    /// Whether a rerun has been requested and not yet consumed.
    #[must_use]
    pub fn rerun_requested(&self) -> bool {
        self.rerun_requested.load(Ordering::SeqCst)
    }

    /// Consumes a pending rerun request, clearing both the rerun flag and
    /// the stop flag, and reports whether one was pending.
    ///
    /// A stop that raced the rerun request is absorbed by the reset: the
    /// next pass starts with a clear stop flag.
    pub fn reset_if_rerun_requested(&self) -> bool {
        if self.rerun_requested.swap(false, Ordering::SeqCst) {
            self.inner.clear_stop();
            true
        } else {
            false
        }
    }
}

impl Deref for RerunProgress {
    type Target = Progress;

    fn deref(&self) -> &Progress {
        &self.inner
    }
}

impl AsRef<Progress> for RerunProgress {
    fn as_ref(&self) -> &Progress {
        &self.inner
    }
}

impl Drop for RerunProgress {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                !self.rerun_requested.load(Ordering::SeqCst),
                "progress dropped with an unresolved rerun request"
            );
        }
    }
}
