//! Progress-callback trait for per-object pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the object directories.
//!
//! # Example
//!
//! ```rust
//! use iiif_pipeline::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     published: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_object_complete(&self, index: usize, total: usize, ref_id: &str, identifier: &str) {
//!         self.published.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} published as {}", index, total, ref_id, identifier);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .image_server_url("https://images.example.org")
//!     .progress_callback(Arc::new(CountingCallback { published: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the orchestrator as it processes each object directory.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Objects are processed one at a time, but the trait
/// is `Send + Sync` so a callback can be shared with a UI thread.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after discovery, before the first object is processed.
    fn on_run_start(&self, total_objects: usize) {
        let _ = total_objects;
    }

    /// Called when work on an object directory begins.
    ///
    /// # Arguments
    /// * `index` — 1-indexed position in discovery order
    /// * `total` — number of object directories discovered
    /// * `ref_id` — the directory name
    fn on_object_start(&self, index: usize, total: usize, ref_id: &str) {
        let _ = (index, total, ref_id);
    }

    /// Called each time an object reaches a new stage.
    fn on_stage(&self, ref_id: &str, stage: Stage) {
        let _ = (ref_id, stage);
    }

    /// Called when an object has been published and its local files removed.
    fn on_object_complete(&self, index: usize, total: usize, ref_id: &str, identifier: &str) {
        let _ = (index, total, ref_id, identifier);
    }

    /// Called when an object's processing was abandoned.
    fn on_object_error(&self, index: usize, total: usize, ref_id: &str, error: &str) {
        let _ = (index, total, ref_id, error);
    }

    /// Called once after every object has been attempted.
    fn on_run_complete(&self, total_objects: usize, succeeded: usize) {
        let _ = (total_objects, succeeded);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
