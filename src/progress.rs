//! Progress-callback trait for per-item batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! events as the executor works through the queue.
//!
//! Items are processed strictly one at a time, so events for one run arrive
//! in queue order: `on_item_start(i)` is always followed by exactly one of
//! `on_item_complete(i)` / `on_item_error(i)` and then `on_progress`, before
//! `on_item_start(i + 1)`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_batch::{BatchProgressCallback, BatchConfig};
//! use std::sync::{Arc, Mutex};
//!
//! struct Fractions(Mutex<Vec<f64>>);
//!
//! impl BatchProgressCallback for Fractions {
//!     fn on_progress(&self, fraction: f64) {
//!         self.0.lock().unwrap().push(fraction);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(Fractions(Mutex::new(Vec::new()))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the executor as it processes each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync` because the
/// pipeline may be driven from any Tokio worker thread.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first item is dispatched.
    fn on_batch_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before the transform is invoked for an item.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in the batch
    /// * `total`: number of items in the batch
    /// * `name`: original item name
    fn on_item_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when an item transformed successfully.
    ///
    /// `output_len` is the byte length of the transformed output.
    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let _ = (index, total, name, output_len);
    }

    /// Called when an item failed; the batch continues.
    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called after every item with the completed fraction in `[0, 1]`.
    ///
    /// Failed items count toward completion. The value never decreases
    /// within one run.
    fn on_progress(&self, fraction: f64) {
        let _ = fraction;
    }

    /// Called once after the archive is finalized.
    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let _ = (total_items, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        fractions: Mutex<Vec<f64>>,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_item_start(&self, _index: usize, _total: usize, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_complete(&self, _index: usize, _total: usize, _name: &str, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_item_error(&self, _index: usize, _total: usize, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_progress(&self, fraction: f64) {
            self.fractions.lock().unwrap().push(fraction);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_item_start(1, 2, "a.png");
        cb.on_item_complete(1, 2, "a.png", 42);
        cb.on_item_error(2, 2, "b.png", "corrupt");
        cb.on_progress(1.0);
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_item_start(1, 2, "a.png");
        tracker.on_item_complete(1, 2, "a.png", 100);
        tracker.on_progress(0.5);
        tracker.on_item_start(2, 2, "b.png");
        tracker.on_item_error(2, 2, "b.png", "bad header");
        tracker.on_progress(1.0);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.fractions.lock().unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_progress(0.1);
    }
}
