//! External program contracts: the JPEG2000 encoder and the PDF tools.
//!
//! The pipeline never links a codec. It shells out, one blocking child
//! process at a time, and treats any non-zero exit as a hard failure carrying
//! the tool's stderr. The traits exist so the derivative engine can be driven
//! by stand-ins in tests.

use crate::config::ToolPaths;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Fixed encoder policy: compression ratio, precincts (256² for the first two
/// levels, 128² after), 64×64 code-blocks, RPCL progression, SOP markers.
pub const OPJ_POLICY: &[&str] = &[
    "-r",
    "1.5",
    "-c",
    "[256,256],[256,256],[128,128]",
    "-b",
    "64,64",
    "-p",
    "RPCL",
    "-SOP",
];

/// Encodes one raster master into one JPEG2000 file.
#[async_trait]
pub trait Jp2Encoder: Send + Sync {
    /// Write `output` from `source` with `layers` resolution levels.
    async fn encode(&self, source: &Path, output: &Path, layers: u32) -> Result<(), PipelineError>;
}

/// Builds and rewrites PDFs.
#[async_trait]
pub trait PdfTools: Send + Sync {
    /// Wrap `images`, in order, as the pages of a new PDF at `output`.
    async fn concatenate(&self, images: &[PathBuf], output: &Path) -> Result<(), PipelineError>;

    /// Write a downsampled (`/screen` profile) copy of `input` to `output`.
    async fn compress(&self, input: &Path, output: &Path) -> Result<(), PipelineError>;

    /// Write a copy of `input` with a recognised-text layer to `output`.
    async fn ocr(&self, input: &Path, output: &Path) -> Result<(), PipelineError>;
}

/// [`Jp2Encoder`] backed by OpenJPEG's `opj_compress`.
#[derive(Debug, Clone)]
pub struct OpjCompress {
    exe: String,
}

impl OpjCompress {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            exe: tools.opj_compress.clone(),
        }
    }
}

#[async_trait]
impl Jp2Encoder for OpjCompress {
    async fn encode(&self, source: &Path, output: &Path, layers: u32) -> Result<(), PipelineError> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            source.into(),
            "-o".into(),
            output.into(),
            "-n".into(),
            layers.to_string().into(),
        ];
        args.extend(OPJ_POLICY.iter().map(OsString::from));
        run_tool(&self.exe, &args).await.map(|_| ())
    }
}

/// [`PdfTools`] backed by `img2pdf`, Ghostscript and `ocrmypdf`.
#[derive(Debug, Clone)]
pub struct CommandPdfTools {
    img2pdf: String,
    ghostscript: String,
    ocrmypdf: String,
}

impl CommandPdfTools {
    pub fn new(tools: &ToolPaths) -> Self {
        Self {
            img2pdf: tools.img2pdf.clone(),
            ghostscript: tools.ghostscript.clone(),
            ocrmypdf: tools.ocrmypdf.clone(),
        }
    }
}

#[async_trait]
impl PdfTools for CommandPdfTools {
    async fn concatenate(&self, images: &[PathBuf], output: &Path) -> Result<(), PipelineError> {
        let mut args: Vec<OsString> = vec!["-o".into(), output.into()];
        args.extend(images.iter().map(|p| p.as_os_str().to_owned()));
        run_tool(&self.img2pdf, &args).await.map(|_| ())
    }

    async fn compress(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        let mut out_arg = OsString::from("-sOutputFile=");
        out_arg.push(output);
        let args: Vec<OsString> = vec![
            "-sDEVICE=pdfwrite".into(),
            "-dCompatibilityLevel=1.4".into(),
            "-dPDFSETTINGS=/screen".into(),
            "-dNOPAUSE".into(),
            "-dQUIET".into(),
            "-dBATCH".into(),
            out_arg,
            input.into(),
        ];
        run_tool(&self.ghostscript, &args).await.map(|_| ())
    }

    async fn ocr(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        let args: Vec<OsString> = vec![
            "--optimize".into(),
            "0".into(),
            "--quiet".into(),
            input.into(),
            output.into(),
        ];
        run_tool(&self.ocrmypdf, &args).await.map(|_| ())
    }
}

/// Run `exe` to completion, failing on spawn error or non-zero exit.
pub async fn run_tool(exe: &str, args: &[OsString]) -> Result<Output, PipelineError> {
    debug!("Running {} {:?}", exe, args);
    let output = Command::new(exe)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::ToolSpawnFailed {
            tool: exe.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(PipelineError::ToolFailed {
            tool: exe.to_string(),
            status: output.status.to_string(),
            stderr: detail.trim().to_string(),
        });
    }
    Ok(output)
}
