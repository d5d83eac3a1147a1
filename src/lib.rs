//! # iiif-pipeline
//!
//! Turn archival TIFF masters into IIIF derivative packages and publish them.
//!
//! ## Input and output
//!
//! ```text
//! source_root/
//!   {ref_id}/master/*.tif        one directory per archival object
//!
//! target_root/                   scratch space, empty again after a clean run
//!   images/{id}_{page}.jp2
//!   pdfs/{id}.pdf
//!   manifests/{id}.json
//!
//! object store                   images/{id}_{page}, pdfs/{id}, manifests/{id}
//! ```
//!
//! `{id}` is minted from the object's canonical URI (see
//! [`pipeline::identifier`]), so re-running against the same object always
//! produces the same names, and the existence checks turn a repeat run into a
//! reported `AlreadyExists` rather than a silent overwrite.
//!
//! ## Failure isolation
//!
//! Objects are processed one at a time. A failure abandons that object only:
//! it is logged once at ERROR level, its local artifacts are removed, and the
//! run continues. [`Pipeline::run`] returns a [`RunReport`] with one
//! [`ObjectOutcome`] per object directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iiif_pipeline::{settings, Pipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = settings::load(None)?;
//!     let config = settings.config_builder().skip_first(true).build()?;
//!     let pipeline = Pipeline::from_settings(&settings, config)?;
//!     let report = pipeline.run(Path::new("/data/incoming"), Path::new("/data/scratch")).await?;
//!     eprintln!("{} published, {} failed", report.succeeded, report.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `iiif-pipeline` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod settings;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use crate::config::{PipelineConfig, PipelineConfigBuilder, ToolPaths};
pub use crate::error::{ErrorKind, PipelineError};
pub use crate::output::{ErrorReport, ObjectOutcome, RunReport, Stage};
pub use crate::progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use crate::run::{OutputDirs, Pipeline};
pub use crate::settings::Settings;
