//! The per-object orchestrator.
//!
//! [`Pipeline::run`] walks `source_root/{ref_id}/master/*.tif`, one object
//! directory at a time, and drives each through
//!
//! ```text
//! Discovered → MetadataResolved → TilesCreated → ManifestCreated
//!            → PdfCreated → PdfPostprocessed → Uploaded → CleanedUp
//! ```
//!
//! Any error abandons the current object only. The failure is logged once at
//! ERROR, the object's local artifacts are removed, and the loop moves on.
//! Artifacts are removed by identifier prefix, except when the failure was an
//! `AlreadyExists` check: then only the files this run wrote are removed,
//! because whatever tripped the check belongs to an earlier run.
//!
//! On success the local copies are removed too. The remote store is the
//! system of record; `target_root` is scratch space.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{ErrorReport, ObjectOutcome, RunReport, Stage};
use crate::pipeline::derivatives::DerivativeEngine;
use crate::pipeline::{blocking, identifier};
use crate::pipeline::manifest::ManifestBuilder;
use crate::pipeline::matcher::{self, MatchOptions};
use crate::pipeline::metadata::MetadataResolver;
use crate::pipeline::publish::{ObjectStore, PublishClient};
use crate::settings::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Output directory for JPEG2000 tiles, and their remote key prefix.
pub const IMAGES_DIR: &str = "images";
/// Output directory for PDFs, and their remote key prefix.
pub const PDFS_DIR: &str = "pdfs";
/// Output directory for manifests, and their remote key prefix.
pub const MANIFESTS_DIR: &str = "manifests";
/// Subdirectory of each object directory holding the masters.
pub const MASTER_DIR: &str = "master";

/// The three output directories under a target root.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub images: PathBuf,
    pub pdfs: PathBuf,
    pub manifests: PathBuf,
}

impl OutputDirs {
    pub fn under(target_root: &Path) -> Self {
        Self {
            images: target_root.join(IMAGES_DIR),
            pdfs: target_root.join(PDFS_DIR),
            manifests: target_root.join(MANIFESTS_DIR),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [&self.images, &self.pdfs, &self.manifests]
    }

    async fn create(&self) -> Result<(), PipelineError> {
        for dir in self.all() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Everything shared by the objects of one run.
struct Workspace {
    dirs: OutputDirs,
    manifests: ManifestBuilder,
}

/// Bookkeeping for the object currently being processed.
struct ObjectRun {
    index: usize,
    total: usize,
    ref_id: String,
    identifier: Option<String>,
    stage: Stage,
    /// Files this run created, in creation order.
    written: Vec<PathBuf>,
    pages: usize,
}

/// Orchestrates metadata lookup, derivative generation and publishing.
pub struct Pipeline {
    config: PipelineConfig,
    resolver: Arc<dyn MetadataResolver>,
    engine: DerivativeEngine,
    publisher: PublishClient,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn MetadataResolver>,
        engine: DerivativeEngine,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            resolver,
            engine,
            publisher: PublishClient::new(store),
        }
    }

    /// Pipeline wired to ArchivesSpace, the configured store and the
    /// command-line tools.
    pub fn from_settings(settings: &Settings, config: PipelineConfig) -> Result<Self, PipelineError> {
        let resolver = settings.metadata_resolver()?;
        let store = settings.object_store()?;
        let engine = DerivativeEngine::from_config(&config);
        Ok(Self::new(config, resolver, engine, store))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process every object directory under `source_root`, writing scratch
    /// artifacts under `target_root`.
    ///
    /// # Errors
    /// Only for problems that prevent the run from starting: a missing source
    /// root or output directories that cannot be created. Per-object failures
    /// are reported in the returned [`RunReport`].
    pub async fn run(&self, source_root: &Path, target_root: &Path) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        if !source_root.is_dir() {
            return Err(PipelineError::Structural {
                path: source_root.to_path_buf(),
                reason: "source directory does not exist or is not a directory".into(),
            });
        }

        let dirs = OutputDirs::under(target_root);
        dirs.create().await?;
        let ws = Workspace {
            manifests: ManifestBuilder::new(&self.config, &dirs.manifests),
            dirs,
        };

        let mut excluded: Vec<PathBuf> = ws.dirs.all().iter().map(|p| p.to_path_buf()).collect();
        excluded.push(target_root.to_path_buf());
        let root = source_root.to_path_buf();
        let objects = blocking("discovery", move || {
            let excluded: Vec<&Path> = excluded.iter().map(PathBuf::as_path).collect();
            matcher::object_dirs(&root, &excluded)
        })
        .await?;
        let total = objects.len();
        info!("Found {} object directories in {}", total, source_root.display());

        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_start(total);
        }

        let mut report = RunReport::default();
        for (i, object_dir) in objects.iter().enumerate() {
            let outcome = self.process(&ws, object_dir, i + 1, total).await;
            if outcome.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.outcomes.push(outcome);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Run complete: {}/{} objects published, {} failed, {}ms",
            report.succeeded, total, report.failed, report.duration_ms
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_complete(total, report.succeeded);
        }
        Ok(report)
    }

    /// Process one object directory to an outcome. Never fails.
    async fn process(&self, ws: &Workspace, object_dir: &Path, index: usize, total: usize) -> ObjectOutcome {
        let started = Instant::now();
        let mut run = ObjectRun {
            index,
            total,
            ref_id: matcher::file_name(object_dir),
            identifier: None,
            stage: Stage::Discovered,
            written: Vec::new(),
            pages: 0,
        };
        if let Some(cb) = &self.config.progress_callback {
            cb.on_object_start(index, total, &run.ref_id);
        }

        let result = self.publish_object(ws, object_dir, &mut run).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let identifier = run.identifier.clone().unwrap_or_default();
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_object_complete(run.index, run.total, &run.ref_id, &identifier);
                }
                ObjectOutcome {
                    ref_id: run.ref_id,
                    identifier: run.identifier,
                    stage: run.stage,
                    failed_at: None,
                    error: None,
                    pages: run.pages,
                    duration_ms,
                }
            }
            Err(e) => {
                error!(
                    identifier = run.identifier.as_deref().unwrap_or("none"),
                    ref_id = %run.ref_id,
                    stage = %run.stage,
                    kind = %e.kind(),
                    "Failed to process {}: {}",
                    run.ref_id,
                    e
                );
                self.discard(ws, &run, &e).await;
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_stage(&run.ref_id, Stage::Failed);
                    cb.on_object_error(run.index, run.total, &run.ref_id, &e.to_string());
                }
                ObjectOutcome {
                    ref_id: run.ref_id,
                    identifier: run.identifier,
                    stage: Stage::Failed,
                    failed_at: Some(run.stage),
                    error: Some(ErrorReport::from(&e)),
                    pages: 0,
                    duration_ms,
                }
            }
        }
    }

    async fn publish_object(&self, ws: &Workspace, object_dir: &Path, run: &mut ObjectRun) -> Result<(), PipelineError> {
        let replace = self.config.replace;
        let master = object_dir.join(MASTER_DIR);
        if !master.is_dir() {
            return Err(PipelineError::Structural {
                path: object_dir.to_path_buf(),
                reason: format!("no '{MASTER_DIR}' subdirectory"),
            });
        }

        // ── Metadata + identifier ────────────────────────────────────────
        let metadata = self.resolver.resolve(&run.ref_id).await?;
        let identifier = identifier::mint(&metadata.uri);
        debug!("{} → {} (seed {})", run.ref_id, identifier, metadata.uri);
        run.identifier = Some(identifier.clone());
        self.advance(run, Stage::MetadataResolved);

        // ── Tiles ────────────────────────────────────────────────────────
        let skip_first = self.config.skip_first;
        let masters = blocking("master listing", move || {
            let mut masters = matcher::matching_files(
                &master,
                MatchOptions::default().skip_first(skip_first).with_full_path(),
            )?;
            matcher::sort_pages(&mut masters);
            Ok(masters)
        })
        .await?;
        let tiles = self
            .engine
            .create_tiles(&masters, &identifier, &ws.dirs.images, replace)
            .await?;
        run.written.extend(tiles.iter().cloned());
        run.pages = tiles.len();
        self.advance(run, Stage::TilesCreated);

        // ── Manifest ─────────────────────────────────────────────────────
        let manifest = ws
            .manifests
            .create_manifest(&tiles, &identifier, &metadata, replace)
            .await?;
        run.written.push(manifest.clone());
        self.advance(run, Stage::ManifestCreated);

        // ── PDF ──────────────────────────────────────────────────────────
        let pdf = self
            .engine
            .create_pdf(&tiles, &identifier, &ws.dirs.pdfs, replace)
            .await?;
        run.written.push(pdf.clone());
        self.advance(run, Stage::PdfCreated);

        if self.config.compress_pdf {
            self.engine.compress_pdf(&pdf).await?;
        }
        if self.config.ocr_pdf {
            self.engine.ocr_pdf(&pdf).await?;
        }
        self.advance(run, Stage::PdfPostprocessed);

        // ── Publish ──────────────────────────────────────────────────────
        // Manifest last: it must never be visible before its images.
        self.publisher.upload_files(&tiles, IMAGES_DIR, replace).await?;
        self.publisher
            .upload_files(std::slice::from_ref(&pdf), PDFS_DIR, replace)
            .await?;
        self.publisher
            .upload_files(std::slice::from_ref(&manifest), MANIFESTS_DIR, replace)
            .await?;
        self.advance(run, Stage::Uploaded);

        // ── Cleanup ──────────────────────────────────────────────────────
        remove_artifacts(&ws.dirs, &identifier).await?;
        run.written.clear();
        self.advance(run, Stage::CleanedUp);

        if self.config.cleanup_source {
            tokio::fs::remove_dir_all(object_dir)
                .await
                .map_err(|e| PipelineError::io(object_dir, e))?;
            info!("Removed source directory {}", object_dir.display());
        }
        Ok(())
    }

    fn advance(&self, run: &mut ObjectRun, stage: Stage) {
        run.stage = stage;
        info!("{} [{}/{}]: {}", run.ref_id, run.index, run.total, stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage(&run.ref_id, stage);
        }
    }

    /// Remove a failed object's local artifacts. Problems are logged, not
    /// returned: the object has already failed.
    async fn discard(&self, ws: &Workspace, run: &ObjectRun, cause: &PipelineError) {
        let Some(identifier) = run.identifier.as_deref() else {
            return;
        };

        if cause.kind().is_already_done() {
            for path in &run.written {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Could not remove {}: {}", path.display(), e),
                }
            }
            debug!("Removed {} files written for {}", run.written.len(), identifier);
            return;
        }

        if let Err(e) = remove_artifacts(&ws.dirs, identifier).await {
            warn!("Cleanup after failure of {} incomplete: {}", identifier, e);
        }
    }
}

/// [`matcher::cleanup_files`] over all three output directories, off the
/// async executor.
async fn remove_artifacts(dirs: &OutputDirs, identifier: &str) -> Result<usize, PipelineError> {
    let dirs = dirs.clone();
    let identifier = identifier.to_string();
    blocking("cleanup", move || matcher::cleanup_files(&identifier, &dirs.all())).await
}
