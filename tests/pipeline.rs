//! End-to-end tests for the orchestrator.
//!
//! The external world is faked: the encoder writes a JP2 header carrying the
//! master's dimensions, the PDF tools write stub PDFs, metadata comes from a
//! script, and the object store is a directory under the test's temp dir.
//! ERROR records are counted with a `tracing-subscriber` layer.

use async_trait::async_trait;
use iiif_pipeline::pipeline::derivatives::DerivativeEngine;
use iiif_pipeline::pipeline::identifier;
use iiif_pipeline::pipeline::metadata::{MetadataResolver, ObjectMetadata};
use iiif_pipeline::pipeline::publish::{FsObjectStore, ObjectStore};
use iiif_pipeline::pipeline::tools::{Jp2Encoder, PdfTools};
use iiif_pipeline::{ErrorKind, Pipeline, PipelineConfig, PipelineError, PipelineProgressCallback, RunReport, Stage};
use image::{GrayImage, Luma};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

// ── Fakes ────────────────────────────────────────────────────────────────────

fn jp2_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
    out.extend_from_slice(&20u32.to_be_bytes());
    out.extend_from_slice(b"ftypjp2 ");
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(b"jp2 ");
    out.extend_from_slice(&30u32.to_be_bytes());
    out.extend_from_slice(b"jp2h");
    out.extend_from_slice(&22u32.to_be_bytes());
    out.extend_from_slice(b"ihdr");
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&[0, 1, 8, 7, 0, 0]);
    out
}

struct FakeEncoder;

#[async_trait]
impl Jp2Encoder for FakeEncoder {
    async fn encode(&self, source: &Path, output: &Path, _layers: u32) -> Result<(), PipelineError> {
        let (w, h) = image::image_dimensions(source).unwrap();
        std::fs::write(output, jp2_header(w, h)).unwrap();
        Ok(())
    }
}

struct FakePdfTools;

#[async_trait]
impl PdfTools for FakePdfTools {
    async fn concatenate(&self, images: &[PathBuf], output: &Path) -> Result<(), PipelineError> {
        std::fs::write(output, format!("%PDF-1.4\n% {} pages\n", images.len())).unwrap();
        Ok(())
    }

    async fn compress(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        std::fs::copy(input, output).unwrap();
        Ok(())
    }

    async fn ocr(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        std::fs::copy(input, output).unwrap();
        Ok(())
    }
}

/// Every ref id resolves except those listed as missing.
#[derive(Default)]
struct ScriptedResolver {
    missing: HashSet<String>,
}

fn uri_for(ref_id: &str) -> String {
    format!("/repositories/2/archival_objects/{ref_id}")
}

#[async_trait]
impl MetadataResolver for ScriptedResolver {
    async fn resolve(&self, ref_id: &str) -> Result<ObjectMetadata, PipelineError> {
        if self.missing.contains(ref_id) {
            return Err(PipelineError::NotFound {
                ref_id: ref_id.to_string(),
            });
        }
        Ok(ObjectMetadata {
            title: format!("Object {ref_id}"),
            dates: "1950".to_string(),
            uri: uri_for(ref_id),
        })
    }
}

/// Filesystem store that records content types and can refuse one key.
struct RecordingStore {
    inner: FsObjectStore,
    fail_key: Option<String>,
    puts: Mutex<Vec<(String, String)>>,
}

impl RecordingStore {
    fn new(root: &Path) -> Self {
        Self {
            inner: FsObjectStore::new(root, "iiif"),
            fail_key: None,
            puts: Mutex::new(Vec::new()),
        }
    }

    fn content_type_of(&self, key: &str) -> Option<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        self.inner.exists(key).await
    }

    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<(), PipelineError> {
        if self.fail_key.as_deref() == Some(key) {
            return Err(PipelineError::Infrastructure {
                service: "object store".into(),
                detail: "connection reset".into(),
            });
        }
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string()));
        self.inner.put(key, path, content_type).await
    }
}

#[derive(Default)]
struct RecordingProgress {
    completed: AtomicUsize,
    errored: AtomicUsize,
    stages: Mutex<Vec<(String, Stage)>>,
}

impl PipelineProgressCallback for RecordingProgress {
    fn on_stage(&self, ref_id: &str, stage: Stage) {
        self.stages.lock().unwrap().push((ref_id.to_string(), stage));
    }

    fn on_object_complete(&self, _index: usize, _total: usize, _ref_id: &str, _identifier: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_object_error(&self, _index: usize, _total: usize, _ref_id: &str, _error: &str) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts ERROR-level events.
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

struct Fixture {
    _tmp: TempDir,
    source: PathBuf,
    target: PathBuf,
    remote: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        let target = tmp.path().join("target");
        let remote = tmp.path().join("remote");
        std::fs::create_dir_all(&source).unwrap();
        Self {
            _tmp: tmp,
            source,
            target,
            remote,
        }
    }

    /// `source/{ref_id}/master/{ref_id}_001.tif …` with `pages` masters.
    fn add_object(&self, ref_id: &str, pages: usize) {
        let master = self.source.join(ref_id).join("master");
        std::fs::create_dir_all(&master).unwrap();
        for p in 1..=pages {
            let img = GrayImage::from_pixel(120 + p as u32, 160, Luma([200u8]));
            img.save(master.join(format!("{ref_id}_{p:03}.tif"))).unwrap();
        }
    }

    fn config(&self) -> iiif_pipeline::PipelineConfigBuilder {
        PipelineConfig::builder().image_server_url("https://images.example.org")
    }

    fn pipeline(&self, config: PipelineConfig, resolver: ScriptedResolver, store: Arc<RecordingStore>) -> Pipeline {
        Pipeline::new(
            config,
            Arc::new(resolver),
            DerivativeEngine::new(Arc::new(FakeEncoder), Arc::new(FakePdfTools)),
            store,
        )
    }

    fn remote_object(&self, key: &str) -> PathBuf {
        self.remote.join("iiif").join(key)
    }

    fn files_in(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.target.join(dir))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

async fn run_counting_errors(pipeline: &Pipeline, source: &Path, target: &Path) -> (RunReport, usize) {
    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);
    let report = pipeline.run(source, target).await.unwrap();
    (report, errors.load(Ordering::SeqCst))
}

fn id_of(ref_id: &str) -> String {
    identifier::mint(&uri_for(ref_id))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn publishes_every_object_and_leaves_no_local_files() {
    let fx = Fixture::new();
    let objects = [("aaa111", 2), ("bbb222", 3), ("ccc333", 5)];
    for (ref_id, pages) in objects {
        fx.add_object(ref_id, pages);
    }

    let progress = Arc::new(RecordingProgress::default());
    let config = fx.config().progress_callback(progress.clone()).build().unwrap();
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(config, ScriptedResolver::default(), store.clone());

    let (report, errors) = run_counting_errors(&pipeline, &fx.source, &fx.target).await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(errors, 0);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 3);
    assert_eq!(progress.errored.load(Ordering::SeqCst), 0);

    for dir in ["images", "pdfs", "manifests"] {
        assert!(fx.files_in(dir).is_empty(), "{dir} not empty: {:?}", fx.files_in(dir));
    }

    for (ref_id, pages) in objects {
        let id = id_of(ref_id);
        for p in 1..=pages {
            let key = format!("images/{id}_{p:03}");
            assert!(fx.remote_object(&key).is_file(), "missing {key}");
            assert_eq!(store.content_type_of(&key).as_deref(), Some("image/jp2"));
        }
        assert!(!fx.remote_object(&format!("images/{id}_{:03}", pages + 1)).exists());
        assert_eq!(store.content_type_of(&format!("pdfs/{id}")).as_deref(), Some("application/pdf"));
        assert_eq!(
            store.content_type_of(&format!("manifests/{id}")).as_deref(),
            Some("application/json")
        );

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(fx.remote_object(&format!("manifests/{id}"))).unwrap()).unwrap();
        let canvases = manifest["sequences"][0]["canvases"].as_array().unwrap();
        assert_eq!(canvases.len(), pages);
        assert_eq!(canvases[0]["label"], "Page 1");
        assert_eq!(canvases[0]["width"], 121);
        assert_eq!(canvases[0]["height"], 160);
        assert_eq!(manifest["label"], format!("Object {ref_id}"));
    }

    let outcome = &report.outcomes[2];
    assert_eq!(outcome.ref_id, "ccc333");
    assert_eq!(outcome.stage, Stage::CleanedUp);
    assert_eq!(outcome.pages, 5);

    let stages: Vec<Stage> = progress
        .stages
        .lock()
        .unwrap()
        .iter()
        .filter(|(r, _)| r == "aaa111")
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(
        stages,
        vec![
            Stage::MetadataResolved,
            Stage::TilesCreated,
            Stage::ManifestCreated,
            Stage::PdfCreated,
            Stage::PdfPostprocessed,
            Stage::Uploaded,
            Stage::CleanedUp,
        ]
    );
}

#[tokio::test]
async fn metadata_miss_fails_only_that_object() {
    let fx = Fixture::new();
    for ref_id in ["obj1", "obj2", "obj3"] {
        fx.add_object(ref_id, 2);
    }
    let resolver = ScriptedResolver {
        missing: HashSet::from(["obj2".to_string()]),
    };
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), resolver, store);

    let (report, errors) = run_counting_errors(&pipeline, &fx.source, &fx.target).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(errors, 1, "exactly one ERROR record for the failed object");

    let failed = report.failures().next().unwrap();
    assert_eq!(failed.ref_id, "obj2");
    assert_eq!(failed.identifier, None);
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::NotFound);

    for ok in ["obj1", "obj3"] {
        assert!(fx.remote_object(&format!("manifests/{}", id_of(ok))).is_file());
    }
}

#[tokio::test]
async fn upload_failure_cleans_up_that_object_only() {
    let fx = Fixture::new();
    for ref_id in ["obj1", "obj2", "obj3"] {
        fx.add_object(ref_id, 3);
    }
    // someone else's file in the shared scratch space
    std::fs::create_dir_all(fx.target.join("images")).unwrap();
    std::fs::write(fx.target.join("images/unrelated_001.jp2"), jp2_header(10, 10)).unwrap();

    let id2 = id_of("obj2");
    let mut store = RecordingStore::new(&fx.remote);
    store.fail_key = Some(format!("pdfs/{id2}"));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), Arc::new(store));

    let (report, errors) = run_counting_errors(&pipeline, &fx.source, &fx.target).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(errors, 1);
    let failed = report.failures().next().unwrap();
    assert_eq!(failed.identifier.as_deref(), Some(id2.as_str()));
    assert_eq!(failed.failed_at, Some(Stage::PdfPostprocessed));
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Infrastructure);

    assert_eq!(fx.files_in("images"), vec!["unrelated_001.jp2"]);
    assert!(fx.files_in("pdfs").is_empty());
    assert!(fx.files_in("manifests").is_empty());
    assert!(!fx.remote_object(&format!("manifests/{id2}")).exists());

    for ok in ["obj1", "obj3"] {
        let id = id_of(ok);
        assert!(fx.remote_object(&format!("pdfs/{id}")).is_file());
        assert!(fx.remote_object(&format!("manifests/{id}")).is_file());
    }
}

#[tokio::test]
async fn existing_artifact_is_kept_and_this_runs_files_removed() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    let id = id_of("obj1");
    std::fs::create_dir_all(fx.target.join("manifests")).unwrap();
    std::fs::write(fx.target.join(format!("manifests/{id}.json")), "{\"old\":true}").unwrap();

    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), store);

    let (report, errors) = run_counting_errors(&pipeline, &fx.source, &fx.target).await;

    assert_eq!(report.failed, 1);
    assert_eq!(errors, 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.error.as_ref().unwrap().kind, ErrorKind::AlreadyExists);
    assert_eq!(outcome.failed_at, Some(Stage::TilesCreated));

    assert!(fx.files_in("images").is_empty(), "tiles written by this run are removed");
    assert_eq!(
        std::fs::read_to_string(fx.target.join(format!("manifests/{id}.json"))).unwrap(),
        "{\"old\":true}"
    );
    assert!(!fx.remote.exists());
}

#[tokio::test]
async fn replace_overwrites_existing_artifacts() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    let id = id_of("obj1");
    std::fs::create_dir_all(fx.target.join("manifests")).unwrap();
    std::fs::write(fx.target.join(format!("manifests/{id}.json")), "{}").unwrap();

    let store = Arc::new(RecordingStore::new(&fx.remote));
    let config = fx.config().replace(true).build().unwrap();
    let pipeline = fx.pipeline(config, ScriptedResolver::default(), store);

    // first run publishes, second run republishes over the remote copies
    for _ in 0..2 {
        let report = pipeline.run(&fx.source, &fx.target).await.unwrap();
        assert_eq!(report.succeeded, 1, "{:?}", report.outcomes[0].error);
    }
    assert!(fx.files_in("manifests").is_empty());
}

#[tokio::test]
async fn already_published_object_is_rejected_without_replace() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), store);

    let first = pipeline.run(&fx.source, &fx.target).await.unwrap();
    assert_eq!(first.succeeded, 1);

    let second = pipeline.run(&fx.source, &fx.target).await.unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(second.outcomes[0].error.as_ref().unwrap().kind, ErrorKind::AlreadyExists);
    assert_eq!(second.outcomes[0].failed_at, Some(Stage::PdfPostprocessed));
    for dir in ["images", "pdfs", "manifests"] {
        assert!(fx.files_in(dir).is_empty());
    }
}

#[tokio::test]
async fn missing_master_directory_is_structural() {
    let fx = Fixture::new();
    fx.add_object("good", 2);
    std::fs::create_dir_all(fx.source.join("bad/scans")).unwrap();

    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), store);
    let (report, errors) = run_counting_errors(&pipeline, &fx.source, &fx.target).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(errors, 1);
    let bad = report.failures().next().unwrap();
    assert_eq!(bad.ref_id, "bad");
    assert_eq!(bad.error.as_ref().unwrap().kind, ErrorKind::Structural);
}

#[tokio::test]
async fn non_tiff_master_is_invalid_input() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    std::fs::write(fx.source.join("obj1/master/obj1_003.tif"), b"%PDF-1.4 not a tiff").unwrap();

    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), store);
    let report = pipeline.run(&fx.source, &fx.target).await.unwrap();

    assert_eq!(report.outcomes[0].error.as_ref().unwrap().kind, ErrorKind::InvalidInput);
    assert!(fx.files_in("images").is_empty());
}

#[tokio::test]
async fn skip_drops_first_capture() {
    let fx = Fixture::new();
    fx.add_object("obj1", 4);
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let config = fx.config().skip_first(true).build().unwrap();
    let pipeline = fx.pipeline(config, ScriptedResolver::default(), store);

    let report = pipeline.run(&fx.source, &fx.target).await.unwrap();
    assert_eq!(report.outcomes[0].pages, 3);
    let id = id_of("obj1");
    assert!(!fx.remote_object(&format!("images/{id}_001")).exists());
    assert!(fx.remote_object(&format!("images/{id}_002")).is_file());
}

#[tokio::test]
async fn cleanup_source_removes_only_published_objects() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    fx.add_object("obj2", 2);
    let resolver = ScriptedResolver {
        missing: HashSet::from(["obj2".to_string()]),
    };
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let config = fx.config().cleanup_source(true).build().unwrap();
    let pipeline = fx.pipeline(config, resolver, store);

    let report = pipeline.run(&fx.source, &fx.target).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert!(!fx.source.join("obj1").exists());
    assert!(fx.source.join("obj2/master").is_dir());
}

#[tokio::test]
async fn output_directories_inside_source_are_not_objects() {
    let fx = Fixture::new();
    fx.add_object("obj1", 2);
    let store = Arc::new(RecordingStore::new(&fx.remote));
    let pipeline = fx.pipeline(fx.config().build().unwrap(), ScriptedResolver::default(), store);

    // first run creates images/, pdfs/, manifests/ under the source root
    for _ in 0..2 {
        let report = pipeline.run(&fx.source, &fx.source).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].ref_id, "obj1");
    }
    assert!(fx.source.join("images").is_dir());
}
