//! Error types for the iiif-pipeline library.
//!
//! Every component returns [`PipelineError`]. The orchestrator in
//! [`crate::run`] is the only place that recovers from one: it records the
//! failure against the current object, cleans up, and moves on to the next
//! object directory.
//!
//! Callers branch on [`PipelineError::kind`], a flat tag, rather than on the
//! message text. In particular [`ErrorKind::AlreadyExists`] means "this work
//! was done by an earlier run", which the orchestrator treats differently from
//! a genuine failure when it decides what to delete.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the iiif-pipeline library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Metadata ──────────────────────────────────────────────────────────
    /// The metadata service has no archival object with this ref id.
    #[error("Could not find an archival object matching ref_id '{ref_id}'")]
    NotFound { ref_id: String },

    // ── Source layout ─────────────────────────────────────────────────────
    /// The source tree does not have the expected shape.
    #[error("Invalid source layout at '{path}': {reason}")]
    Structural { path: PathBuf, reason: String },

    // ── Idempotency ───────────────────────────────────────────────────────
    /// A local derivative already exists and `replace` is off.
    #[error("'{path}' already exists\nRe-run with --replace to overwrite it.")]
    AlreadyExists { path: PathBuf },

    /// The remote store already holds this key and `replace` is off.
    #[error("'{key}' already exists in bucket '{bucket}'")]
    RemoteExists { bucket: String, key: String },

    // ── Input validation ──────────────────────────────────────────────────
    /// A file presented as a master image is not a TIFF.
    #[error("'{path}' is not a valid source image (detected {detected})")]
    InvalidInput { path: PathBuf, detected: String },

    // ── External tools ────────────────────────────────────────────────────
    /// An external program could not be started.
    #[error("Failed to start '{tool}': {source}\nCheck that it is installed and on PATH.")]
    ToolSpawnFailed {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("'{tool}' exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    // ── Infrastructure ────────────────────────────────────────────────────
    /// Network, authentication or server failure talking to a remote service.
    #[error("{service} request failed: {detail}")]
    Infrastructure { service: String, detail: String },

    // ── I/O ───────────────────────────────────────────────────────────────
    /// Local filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder or settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Flat classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Structural,
    AlreadyExists,
    InvalidInput,
    ExternalTool,
    Infrastructure,
    Io,
    Config,
    Internal,
}

impl ErrorKind {
    /// True when the failure means an earlier run already produced the
    /// artifact, rather than something going wrong in this one.
    pub fn is_already_done(self) -> bool {
        matches!(self, ErrorKind::AlreadyExists)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Structural => "structural",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ExternalTool => "external_tool",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::Structural { .. } => ErrorKind::Structural,
            PipelineError::AlreadyExists { .. } | PipelineError::RemoteExists { .. } => {
                ErrorKind::AlreadyExists
            }
            PipelineError::InvalidInput { .. } => ErrorKind::InvalidInput,
            PipelineError::ToolSpawnFailed { .. } | PipelineError::ToolFailed { .. } => {
                ErrorKind::ExternalTool
            }
            PipelineError::Infrastructure { .. } => ErrorKind::Infrastructure,
            PipelineError::Io { .. } => ErrorKind::Io,
            PipelineError::InvalidConfig(_) => ErrorKind::Config,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn infra(service: &str, detail: impl fmt::Display) -> Self {
        PipelineError::Infrastructure {
            service: service.to_string(),
            detail: detail.to_string(),
        }
    }
}
