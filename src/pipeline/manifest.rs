//! IIIF Presentation 2 manifest for one object's tile set.
//!
//! Every canvas is sized from its tile's own JPEG2000 header and points at
//! an Image API service keyed by the tile's page reference (the tile file
//! name without `.jp2`), so the image server resolves
//! `{image_service_root}{page_ref}` to the uploaded tile.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::matcher::{file_name, stem};
use crate::pipeline::metadata::ObjectMetadata;
use crate::pipeline::{blocking, sniff};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/2/context.json";
const IMAGE_CONTEXT: &str = "http://iiif.io/api/image/2/context.json";
const IMAGE_PROFILE: &str = "http://iiif.io/api/image/2/level2.json";

/// Height of every thumbnail, in pixels.
pub const THUMBNAIL_HEIGHT: u32 = 200;

// ── Presentation 2 document ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub label: String,
    pub metadata: Vec<MetadataEntry>,
    pub thumbnail: ImageResource,
    pub sequences: Vec<Sequence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub canvases: Vec<Canvas>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub images: Vec<Annotation>,
    pub thumbnail: ImageResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub motivation: String,
    pub on: String,
    pub resource: ImageResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub service: ImageService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageService {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@id")]
    pub id: String,
    pub profile: String,
}

/// Width of a [`THUMBNAIL_HEIGHT`]-high thumbnail keeping the aspect ratio.
pub fn thumbnail_width(width: u32, height: u32) -> u32 {
    if height == 0 {
        return 0;
    }
    (f64::from(width) / (f64::from(height) / f64::from(THUMBNAIL_HEIGHT))).round() as u32
}

/// `{manifest_dir}/{identifier}.json`.
pub fn manifest_path(manifest_dir: &Path, identifier: &str) -> PathBuf {
    manifest_dir.join(format!("{identifier}.json"))
}

/// Builds and writes manifests into one directory.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    service_root: String,
    manifest_root: String,
    manifest_dir: PathBuf,
}

impl ManifestBuilder {
    pub fn new(config: &PipelineConfig, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            service_root: config.image_service_root(),
            manifest_root: config.manifest_root(),
            manifest_dir: manifest_dir.into(),
        }
    }

    fn service(&self, page_ref: &str) -> ImageService {
        ImageService {
            context: IMAGE_CONTEXT.to_string(),
            id: format!("{}{}", self.service_root, page_ref),
            profile: IMAGE_PROFILE.to_string(),
        }
    }

    fn image(&self, page_ref: &str, region: &str, size: &str, width: u32, height: u32) -> ImageResource {
        ImageResource {
            id: format!("{}{}/{}/{}/0/default.jpg", self.service_root, page_ref, region, size),
            kind: "dctypes:Image".to_string(),
            format: "image/jpeg".to_string(),
            width,
            height,
            service: self.service(page_ref),
        }
    }

    fn thumbnail(&self, page_ref: &str, width: u32, height: u32) -> ImageResource {
        self.image(
            page_ref,
            "square",
            &format!("{THUMBNAIL_HEIGHT},"),
            thumbnail_width(width, height),
            THUMBNAIL_HEIGHT,
        )
    }

    /// Assemble the manifest document for `tiles`, already in page order.
    ///
    /// # Errors
    /// - `Structural` if `tiles` is empty
    /// - `InvalidInput` if a tile has no readable JPEG2000 header
    pub fn build(
        &self,
        tiles: &[PathBuf],
        identifier: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Manifest, PipelineError> {
        if tiles.is_empty() {
            return Err(PipelineError::Structural {
                path: self.manifest_dir.clone(),
                reason: format!("no tiles to describe for {identifier}"),
            });
        }

        let base = format!("{}{}", self.manifest_root, identifier);
        let mut canvases = Vec::with_capacity(tiles.len());
        let mut manifest_thumb = None;

        for (i, tile) in tiles.iter().enumerate() {
            let (width, height) = sniff::jp2_dimensions(tile)?;
            let name = file_name(tile);
            let page_ref = stem(&name);
            let canvas_id = format!("{base}/canvas/{page_ref}");

            if manifest_thumb.is_none() {
                let mut thumb = self.thumbnail(page_ref, width, height);
                thumb.width = THUMBNAIL_HEIGHT;
                manifest_thumb = Some(thumb);
            }

            canvases.push(Canvas {
                id: canvas_id.clone(),
                kind: "sc:Canvas".to_string(),
                label: format!("Page {}", i + 1),
                width,
                height,
                images: vec![Annotation {
                    id: format!("{base}/annotation/{page_ref}"),
                    kind: "oa:Annotation".to_string(),
                    motivation: "sc:painting".to_string(),
                    on: canvas_id,
                    resource: self.image(page_ref, "full", "max", width, height),
                }],
                thumbnail: self.thumbnail(page_ref, width, height),
            });
        }

        let thumbnail = manifest_thumb.ok_or_else(|| PipelineError::Internal("no first page".into()))?;
        Ok(Manifest {
            context: PRESENTATION_CONTEXT.to_string(),
            id: base.clone(),
            kind: "sc:Manifest".to_string(),
            label: metadata.title.clone(),
            metadata: vec![MetadataEntry {
                label: "Date".to_string(),
                value: metadata.dates.clone(),
            }],
            thumbnail,
            sequences: vec![Sequence {
                id: format!("{base}/sequence/default"),
                kind: "sc:Sequence".to_string(),
                canvases,
            }],
        })
    }

    /// Write `{manifest_dir}/{identifier}.json` describing `tiles`.
    ///
    /// # Errors
    /// - `AlreadyExists` if the manifest exists and `replace` is false
    /// - anything [`ManifestBuilder::build`] returns
    pub async fn create_manifest(
        &self,
        tiles: &[PathBuf],
        identifier: &str,
        metadata: &ObjectMetadata,
        replace: bool,
    ) -> Result<PathBuf, PipelineError> {
        let output = manifest_path(&self.manifest_dir, identifier);
        if !replace && output.exists() {
            return Err(PipelineError::AlreadyExists { path: output });
        }

        let manifest = {
            let builder = self.clone();
            let tiles = tiles.to_vec();
            let identifier = identifier.to_string();
            let metadata = metadata.clone();
            blocking("manifest", move || builder.build(&tiles, &identifier, &metadata)).await?
        };
        let mut json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::Internal(format!("manifest serialisation: {e}")))?;
        json.push('\n');

        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".json.tmp")
            .tempfile_in(&self.manifest_dir)
            .map_err(|e| PipelineError::io(&self.manifest_dir, e))?
            .into_temp_path();
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| PipelineError::io(&output, e))?;
        tmp.persist(&output).map_err(|e| PipelineError::io(&output, e.error))?;

        info!("Wrote manifest {} ({} canvases)", output.display(), tiles.len());
        Ok(output)
    }
}
