//! Result types describing what a run did.

use crate::error::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an object got to in the per-object state machine.
///
/// Stages are ordered; an object that stops early reports the last stage it
/// completed alongside its error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    MetadataResolved,
    TilesCreated,
    ManifestCreated,
    PdfCreated,
    PdfPostprocessed,
    Uploaded,
    CleanedUp,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::MetadataResolved => "metadata resolved",
            Stage::TilesCreated => "tiles created",
            Stage::ManifestCreated => "manifest created",
            Stage::PdfCreated => "pdf created",
            Stage::PdfPostprocessed => "pdf post-processed",
            Stage::Uploaded => "uploaded",
            Stage::CleanedUp => "cleaned up",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Serialisable summary of a [`PipelineError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for ErrorReport {
    fn from(e: &PipelineError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// What happened to one object directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectOutcome {
    /// Directory name, also the metadata lookup key.
    pub ref_id: String,
    /// Minted identifier, if processing got that far.
    pub identifier: Option<String>,
    /// Last stage completed; [`Stage::Failed`] when `error` is set.
    pub stage: Stage,
    /// Stage the object was in when it failed.
    pub failed_at: Option<Stage>,
    pub error: Option<ErrorReport>,
    /// Number of pages published.
    pub pages: usize,
    pub duration_ms: u64,
}

impl ObjectOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a whole run, in discovery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: Vec<ObjectOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ObjectOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}
