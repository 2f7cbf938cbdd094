//! Progress-callback trait for per-record classification events.
//!
//! Inject an [`Arc<dyn ClassificationProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as each record is sent to the classifier.
//!
//! # Example
//!
//! ```rust
//! use edgequake_annotations::{ClassificationProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ClassificationProgressCallback for CountingCallback {
//!     fn on_record_complete(&self, record_id: u32, total_records: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("record {record_id} classified ({done}/{total_records})");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the classification driver as it processes each record.
///
/// With `concurrency > 1`, `on_record_start`, `on_record_complete` and
/// `on_record_error` may interleave across records. All methods default to
/// no-ops.
pub trait ClassificationProgressCallback: Send + Sync {
    /// Called once before the first record is sent.
    fn on_classification_start(&self, total_records: usize) {
        let _ = total_records;
    }

    /// Called just before the request for a record is sent.
    fn on_record_start(&self, record_id: u32, total_records: usize) {
        let _ = (record_id, total_records);
    }

    /// Called when a record received both labels.
    fn on_record_complete(&self, record_id: u32, total_records: usize) {
        let _ = (record_id, total_records);
    }

    /// Called when a record could not be classified.
    fn on_record_error(&self, record_id: u32, total_records: usize, error: &str) {
        let _ = (record_id, total_records, error);
    }

    /// Called once after every record has been attempted.
    fn on_classification_complete(&self, total_records: usize, success_count: usize) {
        let _ = (total_records, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ClassificationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ClassificationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ClassificationProgressCallback for TrackingCallback {
        fn on_record_start(&self, _record_id: u32, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_record_complete(&self, _record_id: u32, _total: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_record_error(&self, _record_id: u32, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_classification_start(2);
        cb.on_record_start(1, 2);
        cb.on_record_complete(1, 2);
        cb.on_record_error(2, 2, "timeout");
        cb.on_classification_complete(2, 1);
    }

    #[test]
    fn tracking_callback_through_arc_dyn() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();
        cb.on_record_start(1, 2);
        cb.on_record_complete(1, 2);
        cb.on_record_start(2, 2);
        cb.on_record_error(2, 2, "bad label");
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
