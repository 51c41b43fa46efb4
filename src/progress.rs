//! Progress-callback trait for per-batch conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the document.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2txt::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_batch_complete(&self, batch: usize, total: usize, output_len: usize, tokens: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Batch {}/{} done ({} bytes, {} tokens)", batch, total, output_len, tokens);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the conversion pipeline as it processes each batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Batches are processed sequentially, but the trait is
/// still `Send + Sync` because the config travels across tasks.
///
/// A local run reports a single batch covering every page.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after extraction, before any batch is processed.
    ///
    /// # Arguments
    /// * `total_pages`: pages extracted for this run
    /// * `total_batches`: batches that will be attempted
    fn on_conversion_start(&self, total_pages: usize, total_batches: usize) {
        let _ = (total_pages, total_batches);
    }

    /// Called just before a batch is sent to the rewrite service.
    ///
    /// # Arguments
    /// * `batch`: 1-indexed batch number
    /// * `total`: total batches
    /// * `first_page`: first page number in the batch
    /// * `last_page`: last page number in the batch
    fn on_batch_start(&self, batch: usize, total: usize, first_page: usize, last_page: usize) {
        let _ = (batch, total, first_page, last_page);
    }

    /// Called when a batch has been processed.
    ///
    /// # Arguments
    /// * `output_len`: byte length of the produced text
    /// * `tokens`: tokens consumed (0 for local processing)
    fn on_batch_complete(&self, batch: usize, total: usize, output_len: usize, tokens: u64) {
        let _ = (batch, total, output_len, tokens);
    }

    /// Called when a batch has no text and is skipped without a service call.
    fn on_batch_skipped(&self, batch: usize, total: usize) {
        let _ = (batch, total);
    }

    /// Called before the dispatcher sleeps to respect the per-minute cap.
    fn on_rate_limit_wait(&self, wait: Duration) {
        let _ = wait;
    }

    /// Called when the daily token cap is reached and the run stops early.
    fn on_quota_exhausted(&self, tokens_today: u64, limit: u64) {
        let _ = (tokens_today, limit);
    }

    /// Called once after the last batch.
    ///
    /// # Arguments
    /// * `total_batches`: batches planned
    /// * `sent_batches`: batches actually sent to the rewrite service
    fn on_conversion_complete(&self, total_batches: usize, sent_batches: usize) {
        let _ = (total_batches, sent_batches);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
