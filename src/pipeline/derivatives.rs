//! Derivative generation: TIFF masters → JPEG2000 tiles → one PDF.
//!
//! ## Duplicate protection
//!
//! Every output name is derived from the object identifier, so an output
//! that already exists means an earlier run got here first. Unless `replace`
//! is set, both operations check all of their outputs *before* writing any of
//! them and fail with [`PipelineError::AlreadyExists`]. A failed check
//! therefore never leaves a half-written set behind.
//!
//! ## PDF rewrites
//!
//! Concatenation, compression and OCR each write to a hidden temporary file
//! next to the PDF and then rename it over `{identifier}.pdf`, so the
//! canonical path only ever holds a complete document.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::matcher::{file_name, page_token};
use crate::pipeline::sniff::{self, MIME_TIFF};
use crate::pipeline::tools::{CommandPdfTools, Jp2Encoder, OpjCompress, PdfTools};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info};

/// Edge length, in pixels, of the smallest resolution level.
const BASE_RESOLUTION: u64 = 96;

/// Number of resolution levels needed to go from a ~96px base to full size.
///
/// Equal to `ceil(log2(max(width, height)) - log2(96)) + 1`, never less than 1.
/// Computed with integer doubling so exact powers of two do not pick up an
/// extra level from floating-point error.
pub fn calculate_layers(width: u32, height: u32) -> u32 {
    let longest = u64::from(width.max(height));
    let mut layers = 1;
    let mut reach = BASE_RESOLUTION;
    while reach < longest {
        reach *= 2;
        layers += 1;
    }
    layers
}

/// `{target_dir}/{identifier}_{page_token}.jp2` for a master file.
pub fn tile_path(target_dir: &Path, identifier: &str, source: &Path) -> PathBuf {
    target_dir.join(format!("{}_{}.jp2", identifier, page_token(&file_name(source))))
}

/// `{target_dir}/{identifier}.pdf`.
pub fn pdf_path(target_dir: &Path, identifier: &str) -> PathBuf {
    target_dir.join(format!("{identifier}.pdf"))
}

/// Produces tiles and PDFs through external tools.
#[derive(Clone)]
pub struct DerivativeEngine {
    encoder: Arc<dyn Jp2Encoder>,
    pdf_tools: Arc<dyn PdfTools>,
}

impl DerivativeEngine {
    pub fn new(encoder: Arc<dyn Jp2Encoder>, pdf_tools: Arc<dyn PdfTools>) -> Self {
        Self { encoder, pdf_tools }
    }

    /// Engine backed by the configured command-line tools.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Arc::new(OpjCompress::new(&config.tools)),
            Arc::new(CommandPdfTools::new(&config.tools)),
        )
    }

    /// Encode each master (already in page order) as a JPEG2000 tile.
    ///
    /// Returns the tile paths in the same order as `sources`.
    ///
    /// # Errors
    /// - `Structural` if `sources` is empty or two masters share a page token
    /// - `AlreadyExists` if any tile exists and `replace` is false
    /// - `InvalidInput` if any master is not a TIFF by content
    /// - `ExternalTool` if the encoder fails
    pub async fn create_tiles(
        &self,
        sources: &[PathBuf],
        identifier: &str,
        target_dir: &Path,
        replace: bool,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        if sources.is_empty() {
            return Err(PipelineError::Structural {
                path: target_dir.to_path_buf(),
                reason: format!("no master images to encode for {identifier}"),
            });
        }

        let outputs: Vec<PathBuf> = sources
            .iter()
            .map(|s| tile_path(target_dir, identifier, s))
            .collect();

        let mut claimed: HashMap<&Path, &Path> = HashMap::new();
        for (source, output) in sources.iter().zip(&outputs) {
            if let Some(first) = claimed.insert(output.as_path(), source.as_path()) {
                return Err(PipelineError::Structural {
                    path: source.clone(),
                    reason: format!(
                        "page token collides with '{}' (both map to '{}')",
                        first.display(),
                        output.display()
                    ),
                });
            }
        }

        if !replace {
            if let Some(existing) = outputs.iter().find(|o| o.exists()) {
                return Err(PipelineError::AlreadyExists {
                    path: existing.clone(),
                });
            }
        }

        for source in sources {
            let detected = sniff::sniff_file(source)?;
            if detected != MIME_TIFF {
                return Err(PipelineError::InvalidInput {
                    path: source.clone(),
                    detected: detected.to_string(),
                });
            }
        }

        for (source, output) in sources.iter().zip(&outputs) {
            let (width, height) = raster_dimensions(source).await?;
            let layers = calculate_layers(width, height);
            debug!(
                "{} is {}x{} px, encoding with {} layers",
                source.display(),
                width,
                height,
                layers
            );
            self.encoder.encode(source, output, layers).await?;
        }

        info!("Created {} JPEG2000 tiles for {}", outputs.len(), identifier);
        Ok(outputs)
    }

    /// Concatenate tiles (already in page order) into `{target_dir}/{identifier}.pdf`.
    ///
    /// # Errors
    /// - `Structural` if `tiles` is empty
    /// - `AlreadyExists` if the PDF exists and `replace` is false
    /// - `ExternalTool` if concatenation fails
    pub async fn create_pdf(
        &self,
        tiles: &[PathBuf],
        identifier: &str,
        target_dir: &Path,
        replace: bool,
    ) -> Result<PathBuf, PipelineError> {
        let output = pdf_path(target_dir, identifier);
        if tiles.is_empty() {
            return Err(PipelineError::Structural {
                path: target_dir.to_path_buf(),
                reason: format!("no tiles to concatenate for {identifier}"),
            });
        }
        if !replace && output.exists() {
            return Err(PipelineError::AlreadyExists { path: output });
        }

        let tmp = temp_sibling(&output)?;
        self.pdf_tools.concatenate(tiles, &tmp).await?;
        persist(tmp, &output)?;

        info!("Created PDF {} from {} pages", output.display(), tiles.len());
        Ok(output)
    }

    /// Replace `pdf` with a `/screen`-quality copy.
    pub async fn compress_pdf(&self, pdf: &Path) -> Result<(), PipelineError> {
        let tmp = temp_sibling(pdf)?;
        self.pdf_tools.compress(pdf, &tmp).await?;
        persist(tmp, pdf)?;
        info!("Compressed {}", pdf.display());
        Ok(())
    }

    /// Replace `pdf` with a copy carrying an OCR text layer.
    pub async fn ocr_pdf(&self, pdf: &Path) -> Result<(), PipelineError> {
        let tmp = temp_sibling(pdf)?;
        self.pdf_tools.ocr(pdf, &tmp).await?;
        persist(tmp, pdf)?;
        info!("Added OCR layer to {}", pdf.display());
        Ok(())
    }
}

/// Pixel dimensions of a raster master, read off the blocking pool.
async fn raster_dimensions(path: &Path) -> Result<(u32, u32), PipelineError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&owned))
        .await
        .map_err(|e| PipelineError::Internal(format!("dimension task panicked: {e}")))?
        .map_err(|e| PipelineError::InvalidInput {
            path: path.to_path_buf(),
            detected: format!("unreadable TIFF ({e})"),
        })
}

/// A hidden, auto-deleting temporary file in the same directory as `target`.
///
/// Same directory means the final rename never crosses filesystems; the
/// leading dot keeps it out of every [`crate::pipeline::matcher`] listing.
fn temp_sibling(target: &Path) -> Result<TempPath, PipelineError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".")
        .suffix(".pdf.tmp")
        .tempfile_in(dir)
        .map(|f| f.into_temp_path())
        .map_err(|e| PipelineError::io(dir, e))
}

fn persist(tmp: TempPath, target: &Path) -> Result<(), PipelineError> {
    tmp.persist(target).map_err(|e| PipelineError::io(target, e.error))
}
