//! CLI binary for iiif-pipeline.
//!
//! A thin shim over the library crate that loads settings, maps CLI flags
//! onto `PipelineConfig`, runs the pipeline and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use iiif_pipeline::{settings, Pipeline, PipelineProgressCallback, ProgressCallback, RunReport, Stage};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the object directories, one log line per finished object.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn failed(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_objects: usize) {
        self.bar.set_length(total_objects as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} objects  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_prefix("Processing");
    }

    fn on_object_start(&self, _index: usize, _total: usize, ref_id: &str) {
        self.bar.set_message(ref_id.to_string());
    }

    fn on_stage(&self, ref_id: &str, stage: Stage) {
        self.bar.set_message(format!("{ref_id}: {stage}"));
    }

    fn on_object_complete(&self, index: usize, total: usize, ref_id: &str, identifier: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            ref_id,
            dim(identifier)
        ));
        self.bar.inc(1);
    }

    fn on_object_error(&self, index: usize, total: usize, ref_id: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            ref_id,
            red(first_line)
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_objects: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed();
        if failed == 0 {
            eprintln!("{} {} objects published", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} objects published  ({} failed)",
                red("✘"),
                bold(&succeeded.to_string()),
                total_objects,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Derivatives written next to the sources
  iiif-pipeline /data/incoming

  # Separate scratch directory, drop colour-bar captures
  iiif-pipeline /data/incoming /data/scratch --skip

  # Re-publish, then remove the published source directories
  iiif-pipeline /data/incoming /data/scratch --replace --cleanup-source

SETTINGS:
  Read from local_settings.toml (or --settings FILE), then overridden by
  environment variables of the form IIIF_PIPELINE__SECTION__KEY, e.g.
    IIIF_PIPELINE__ARCHIVESSPACE__PASSWORD=...
    IIIF_PIPELINE__STORE__BUCKET=iiif

EXTERNAL TOOLS:
  opj_compress (OpenJPEG), img2pdf, gs (Ghostscript), ocrmypdf
  Paths can be overridden in the [tools] settings section.
"#;

/// Create and publish IIIF derivatives for archival objects.
#[derive(Parser, Debug)]
#[command(
    name = "iiif-pipeline",
    version,
    about = "Create JPEG2000 tiles, PDFs and IIIF manifests from TIFF masters and publish them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory holding one `{ref_id}/master/` directory per object.
    source_directory: PathBuf,

    /// Scratch directory for images/, pdfs/ and manifests/. Default: the source directory.
    target_directory: Option<PathBuf>,

    /// Skip masters whose names end in `_001`.
    #[arg(long)]
    skip: bool,

    /// Overwrite existing derivatives and remote objects instead of failing.
    #[arg(long)]
    replace: bool,

    /// Delete each source object directory after it has been published.
    #[arg(long = "cleanup-source", alias = "cleanup_source")]
    cleanup_source: bool,

    /// Settings file. Default: ./local_settings.toml if present.
    #[arg(long, env = "IIIF_PIPELINE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Do not downsample the PDF.
    #[arg(long)]
    no_compress: bool,

    /// Do not add an OCR text layer to the PDF.
    #[arg(long)]
    no_ocr: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Also append log records to this file.
    #[arg(long, env = "IIIF_PIPELINE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Exit non-zero if any object failed.
    #[arg(long)]
    fail_on_error: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the bar active only warnings and the per-object ERROR records
    // reach the terminal; the bar reports everything else.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new("info")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer().with_writer(io::stderr).with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            ),
        )
        .with(file_layer)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let settings = settings::load(cli.settings.as_deref()).context("Failed to load settings")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let mut builder = settings
        .config_builder()
        .skip_first(cli.skip)
        .replace(cli.replace)
        .cleanup_source(cli.cleanup_source)
        .compress_pdf(!cli.no_compress)
        .ocr_pdf(!cli.no_ocr);
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let pipeline = Pipeline::from_settings(&settings, config).context("Failed to initialise pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let source = &cli.source_directory;
    let target = cli.target_directory.as_ref().unwrap_or(source);
    let report = pipeline
        .run(source, target)
        .await
        .with_context(|| format!("Cannot process {}", source.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        print_summary(&report);
    }

    if cli.fail_on_error && report.failed > 0 {
        anyhow::bail!("{} of {} objects failed", report.failed, report.outcomes.len());
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    eprintln!(
        "Published {}/{} objects in {}ms",
        report.succeeded,
        report.outcomes.len(),
        report.duration_ms
    );
    for outcome in report.failures() {
        if let Some(err) = &outcome.error {
            eprintln!("  {} {} [{}]: {}", red("✗"), outcome.ref_id, err.kind, err.message);
        }
    }
}
