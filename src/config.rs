//! Runtime configuration for a pipeline run.
//!
//! All behaviour of a run is controlled through [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`] once at startup and handed by reference to each
//! component constructor. Components never read settings files or the
//! environment themselves; see [`crate::settings`] for how the binary fills
//! the builder from `local_settings.toml`.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a pipeline run.
///
/// # Example
/// ```rust
/// use iiif_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .image_server_url("https://images.example.org")
///     .skip_first(true)
///     .build()
///     .unwrap();
/// assert!(config.compress_pdf);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Drop every master whose stem ends in `_001` (colour bar / target shot). Default: false.
    pub skip_first: bool,

    /// Overwrite existing derivatives and remote objects instead of failing. Default: false.
    pub replace: bool,

    /// Delete a source object directory once it has been published. Default: false.
    pub cleanup_source: bool,

    /// Downsample the concatenated PDF with the `/screen` profile. Default: true.
    pub compress_pdf: bool,

    /// Add an OCR text layer to the PDF. Default: true.
    pub ocr_pdf: bool,

    /// Base URL of the IIIF image server, e.g. `https://images.example.org`.
    ///
    /// Image API service ids are rooted at `{image_server_url}/iiif/2/` and
    /// manifest ids at `{image_server_url}/manifests/`.
    pub image_server_url: String,

    /// Executables for the external derivative tools.
    pub tools: ToolPaths,

    /// Optional per-object progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_first: false,
            replace: false,
            cleanup_source: false,
            compress_pdf: true,
            ocr_pdf: true,
            image_server_url: String::new(),
            tools: ToolPaths::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("skip_first", &self.skip_first)
            .field("replace", &self.replace)
            .field("cleanup_source", &self.cleanup_source)
            .field("compress_pdf", &self.compress_pdf)
            .field("ocr_pdf", &self.ocr_pdf)
            .field("image_server_url", &self.image_server_url)
            .field("tools", &self.tools)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// `{image_server_url}/iiif/2/`, the root of every Image API service id.
    pub fn image_service_root(&self) -> String {
        format!("{}/iiif/2/", self.image_server_url.trim_end_matches('/'))
    }

    /// `{image_server_url}/manifests/`, the root of every manifest id.
    pub fn manifest_root(&self) -> String {
        format!("{}/manifests/", self.image_server_url.trim_end_matches('/'))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn skip_first(mut self, v: bool) -> Self {
        self.config.skip_first = v;
        self
    }

    pub fn replace(mut self, v: bool) -> Self {
        self.config.replace = v;
        self
    }

    pub fn cleanup_source(mut self, v: bool) -> Self {
        self.config.cleanup_source = v;
        self
    }

    pub fn compress_pdf(mut self, v: bool) -> Self {
        self.config.compress_pdf = v;
        self
    }

    pub fn ocr_pdf(mut self, v: bool) -> Self {
        self.config.ocr_pdf = v;
        self
    }

    pub fn image_server_url(mut self, url: impl Into<String>) -> Self {
        self.config.image_server_url = url.into();
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if !(c.image_server_url.starts_with("http://") || c.image_server_url.starts_with("https://")) {
            return Err(PipelineError::InvalidConfig(format!(
                "image server URL must be http(s), got '{}'",
                c.image_server_url
            )));
        }
        for (name, exe) in c.tools.iter() {
            if exe.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "tool '{name}' has an empty executable path"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Executables for the external derivative tools.
///
/// Each is looked up on `PATH` unless given as an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// OpenJPEG encoder. Default: `opj_compress`.
    pub opj_compress: String,
    /// Lossless image-to-PDF wrapper. Default: `img2pdf`.
    pub img2pdf: String,
    /// Ghostscript, used for `/screen` compression. Default: `gs`.
    pub ghostscript: String,
    /// OCR overlay. Default: `ocrmypdf`.
    pub ocrmypdf: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            opj_compress: "opj_compress".to_string(),
            img2pdf: "img2pdf".to_string(),
            ghostscript: "gs".to_string(),
            ocrmypdf: "ocrmypdf".to_string(),
        }
    }
}

impl ToolPaths {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("opj_compress", self.opj_compress.as_str()),
            ("img2pdf", self.img2pdf.as_str()),
            ("ghostscript", self.ghostscript.as_str()),
            ("ocrmypdf", self.ocrmypdf.as_str()),
        ]
        .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::builder()
            .image_server_url("https://images.example.org")
            .build()
            .unwrap();
        assert!(!c.skip_first);
        assert!(!c.replace);
        assert!(!c.cleanup_source);
        assert!(c.compress_pdf);
        assert!(c.ocr_pdf);
        assert_eq!(c.tools.opj_compress, "opj_compress");
    }

    #[test]
    fn rejects_missing_image_server() {
        let err = PipelineConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("image server URL"), "got: {err}");
    }

    #[test]
    fn rejects_empty_tool() {
        let tools = ToolPaths {
            img2pdf: "  ".into(),
            ..ToolPaths::default()
        };
        let err = PipelineConfig::builder()
            .image_server_url("http://localhost:8182")
            .tools(tools)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("img2pdf"), "got: {err}");
    }

    #[test]
    fn url_roots_ignore_trailing_slash() {
        let c = PipelineConfig::builder()
            .image_server_url("https://images.example.org/")
            .build()
            .unwrap();
        assert_eq!(c.image_service_root(), "https://images.example.org/iiif/2/");
        assert_eq!(c.manifest_root(), "https://images.example.org/manifests/");
    }
}
