//! Progress reporting for batch fetches.
//!
//! The fetcher only knows this trait; the binary supplies an `indicatif`
//! implementation and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a batch fetch.
///
/// Implementations must be `Send + Sync` because updates arrive from
/// concurrently polled futures.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total number of units of work.
    fn set_total(&self, total: u64);

    /// Advances progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Updates the message shown next to the progress indicator.
    fn set_message(&self, msg: String);

    /// Marks progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
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
