//! Deployment settings: service endpoints, credentials and tool paths.
//!
//! Loaded in layers with the `config` crate:
//!
//! 1. built-in defaults
//! 2. a TOML settings file (`local_settings.toml` unless given explicitly)
//! 3. environment variables, e.g. `IIIF_PIPELINE__STORE__BUCKET=derivatives`
//!
//! ```toml
//! [archivesspace]
//! baseurl = "https://aspace.example.org/api"
//! username = "pipeline"
//! password = "…"
//! repository = "2"
//!
//! [store]
//! backend = "s3"            # or "filesystem" with `root = "/srv/mirror"`
//! bucket = "iiif"
//! region = "us-east-1"
//! access_key_id = "AKIA…"
//! secret_access_key = "…"
//! # endpoint = "http://localhost:9000"   for S3-compatible services
//!
//! [image_server]
//! baseurl = "https://images.example.org"
//! ```

use crate::config::{PipelineConfig, PipelineConfigBuilder, ToolPaths};
use crate::error::PipelineError;
use crate::pipeline::metadata::{ArchivesSpaceClient, MetadataResolver};
use crate::pipeline::publish::{FsObjectStore, ObjectStore, S3Config, S3ObjectStore};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Settings file read when none is given.
pub const DEFAULT_SETTINGS_FILE: &str = "local_settings.toml";

const ENV_PREFIX: &str = "IIIF_PIPELINE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub archivesspace: ArchivesSpaceSettings,
    pub store: StoreSettings,
    pub image_server: ImageServerSettings,
    #[serde(default)]
    pub tools: ToolPaths,
}

#[derive(Clone, Deserialize)]
pub struct ArchivesSpaceSettings {
    pub baseurl: String,
    pub username: String,
    pub password: String,
    pub repository: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ArchivesSpaceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivesSpaceSettings")
            .field("baseurl", &self.baseurl)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("repository", &self.repository)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    S3,
    Filesystem,
}

#[derive(Clone, Deserialize)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom S3 endpoint; AWS when unset.
    pub endpoint: Option<String>,
    /// Mirror directory for the `filesystem` backend.
    pub root: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("root", &self.root)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageServerSettings {
    pub baseurl: String,
}

/// Load settings from `path` (required to exist) or, when `None`, from
/// [`DEFAULT_SETTINGS_FILE`] if present, then apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<Settings, PipelineError> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::from(Path::new(DEFAULT_SETTINGS_FILE)).required(false),
    };

    let builder = Config::builder()
        .set_default("archivesspace.repository", "2")
        .and_then(|b| b.set_default("archivesspace.timeout_secs", 60))
        .and_then(|b| b.set_default("store.backend", "s3"))
        .and_then(|b| b.set_default("store.region", "us-east-1"))
        .and_then(|b| b.set_default("store.timeout_secs", 300))
        .map_err(config_error)?
        .add_source(file)
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let settings: Settings = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(config_error)?;
    settings.validate()?;
    Ok(settings)
}

fn config_error(e: config::ConfigError) -> PipelineError {
    PipelineError::InvalidConfig(e.to_string())
}

impl Settings {
    fn validate(&self) -> Result<(), PipelineError> {
        let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match self.store.backend {
            StoreBackend::S3 if missing(&self.store.access_key_id) || missing(&self.store.secret_access_key) => {
                Err(PipelineError::InvalidConfig(
                    "store.access_key_id and store.secret_access_key are required for the s3 backend".into(),
                ))
            }
            StoreBackend::Filesystem if self.store.root.is_none() => Err(PipelineError::InvalidConfig(
                "store.root is required for the filesystem backend".into(),
            )),
            _ if self.store.bucket.trim().is_empty() => {
                Err(PipelineError::InvalidConfig("store.bucket must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// A [`PipelineConfig`] builder seeded with the image server and tools.
    pub fn config_builder(&self) -> PipelineConfigBuilder {
        PipelineConfig::builder()
            .image_server_url(self.image_server.baseurl.clone())
            .tools(self.tools.clone())
    }

    pub fn metadata_resolver(&self) -> Result<Arc<dyn MetadataResolver>, PipelineError> {
        Ok(Arc::new(ArchivesSpaceClient::new(&self.archivesspace)?))
    }

    pub fn object_store(&self) -> Result<Arc<dyn ObjectStore>, PipelineError> {
        let s = &self.store;
        Ok(match s.backend {
            StoreBackend::S3 => {
                let mut config = S3Config::new(
                    s.bucket.clone(),
                    s.region.clone(),
                    s.access_key_id.clone().unwrap_or_default(),
                    s.secret_access_key.clone().unwrap_or_default(),
                )
                .with_timeout(Duration::from_secs(s.timeout_secs));
                if let Some(endpoint) = &s.endpoint {
                    config = config.with_endpoint(endpoint.clone());
                }
                Arc::new(S3ObjectStore::new(config))
            }
            StoreBackend::Filesystem => Arc::new(FsObjectStore::new(
                s.root.clone().unwrap_or_default(),
                s.bucket.clone(),
            )),
        })
    }
}
