//! The components the orchestrator in [`crate::run`] coordinates.
//!
//! ## Data Flow
//!
//! ```text
//! {ref_id}/master/*.tif
//!   │
//!   ├─ matcher      list, filter and order the masters
//!   ├─ metadata     ref_id → title, dates, canonical URI
//!   ├─ identifier   URI → 22-character identifier
//!   ├─ derivatives  masters → {id}_{page}.jp2 → {id}.pdf  (via tools)
//!   ├─ manifest     tiles + metadata → {id}.json
//!   └─ publish      images/, pdfs/, manifests/ → object store
//! ```
//!
//! [`sniff`] is shared: derivatives use it to reject non-TIFF masters, the
//! manifest builder to size canvases, and publishing to pick content types.
//!
//! Everything that talks to the outside world (the metadata service, the
//! external tools, the object store) sits behind a trait so the orchestrator
//! can be exercised without any of them.

pub mod derivatives;
pub mod identifier;
pub mod manifest;
pub mod matcher;
pub mod metadata;
pub mod publish;
pub mod sniff;
pub mod tools;

use crate::error::PipelineError;

/// Run blocking filesystem work on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(task: &'static str, f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Internal(format!("{task} task panicked: {e}")))?
}
