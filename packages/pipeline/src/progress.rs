//! Progress reporting for a geocoding run.
//!
//! The worker pool reports through [`ProgressCallback`] without knowing
//! how progress is rendered. The CLI plugs in an `indicatif` bar; the
//! HTTP server and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from the worker pool.
///
/// Implementations must be `Send + Sync`: every worker task holds a
/// clone of the same `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of addresses to resolve.
    fn set_total(&self, total: u64);

    /// Advances by `delta` resolved addresses.
    fn inc(&self, delta: u64);

    /// Updates the status line.
    fn set_message(&self, msg: String);

    /// Marks the run as complete.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
