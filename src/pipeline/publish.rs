//! Publishing local artifacts to a remote object store.
//!
//! [`ObjectStore`] is the minimal store contract: a metadata-only existence
//! check that tells "absent" apart from failure, and an upload with an
//! explicit content type. [`PublishClient`] layers the overwrite policy on
//! top of it.
//!
//! Remote keys are `{destination_prefix}/{basename without extension}`, so
//! `images/Xu28VeAknACEvNWYkUmRbv_0001.jp2` lands at
//! `images/Xu28VeAknACEvNWYkUmRbv_0001`.

use crate::error::PipelineError;
use crate::pipeline::matcher::{file_name, stem};
use crate::pipeline::sniff::{self, MIME_JSON};
use async_trait::async_trait;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "object store";

/// A bucket in a key/value object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Namespace all keys live in.
    fn bucket(&self) -> &str;

    /// `Ok(false)` only when the object is definitely absent.
    async fn exists(&self, key: &str) -> Result<bool, PipelineError>;

    /// Upload the contents of `path` under `key`.
    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<(), PipelineError>;
}

/// `{prefix}/{basename without extension}`.
pub fn remote_key(destination_prefix: &str, path: &Path) -> String {
    let name = file_name(path);
    let prefix = destination_prefix.trim_matches('/');
    if prefix.is_empty() {
        stem(&name).to_string()
    } else {
        format!("{}/{}", prefix, stem(&name))
    }
}

/// `application/json` for manifests, otherwise whatever the bytes say.
pub fn content_type(path: &Path) -> Result<&'static str, PipelineError> {
    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        return Ok(MIME_JSON);
    }
    sniff::sniff_file(path)
}

/// Uploads artifact files with duplicate protection.
#[derive(Clone)]
pub struct PublishClient {
    store: Arc<dyn ObjectStore>,
}

impl PublishClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload every file in `paths` under `destination_prefix`.
    ///
    /// Unless `replace` is set, every key is checked before the first upload,
    /// and an existing key fails the whole call with
    /// [`PipelineError::RemoteExists`] having uploaded nothing. An upload
    /// failure part-way through leaves the earlier uploads in place.
    ///
    /// Returns the remote keys in upload order.
    pub async fn upload_files(
        &self,
        paths: &[PathBuf],
        destination_prefix: &str,
        replace: bool,
    ) -> Result<Vec<String>, PipelineError> {
        let planned: Vec<(String, &PathBuf)> = paths
            .iter()
            .map(|p| (remote_key(destination_prefix, p), p))
            .collect();

        if !replace {
            for (key, _) in &planned {
                if self.store.exists(key).await? {
                    return Err(PipelineError::RemoteExists {
                        bucket: self.store.bucket().to_string(),
                        key: key.clone(),
                    });
                }
            }
        }

        let mut uploaded = Vec::with_capacity(planned.len());
        for (key, path) in planned {
            let mime = content_type(path)?;
            debug!("Uploading {} → {}/{} ({})", path.display(), self.store.bucket(), key, mime);
            self.store.put(&key, path, mime).await?;
            uploaded.push(key);
        }

        info!(
            "Uploaded {} files to {}/{}",
            uploaded.len(),
            self.store.bucket(),
            destination_prefix
        );
        Ok(uploaded)
    }
}

// ── S3 store ─────────────────────────────────────────────────────────────

/// Connection details for [`S3ObjectStore`].
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint (MinIO, LocalStack). Implies path-style addressing.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl S3Config {
    pub fn new(
        bucket: impl Into<String>,
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            endpoint: None,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Amazon S3 (or an S3-compatible service), SigV4-signed with static keys.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "iiif-pipeline-settings",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .timeout_config(TimeoutConfig::builder().operation_timeout(config.timeout).build());
        if let Some(endpoint) = config.endpoint.filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket,
        }
    }
}

fn is_not_found(err: &SdkError<HeadObjectError>) -> bool {
    if let SdkError::ServiceError(e) = err {
        if e.err().is_not_found() {
            return true;
        }
    }
    err.raw_response().is_some_and(|r| r.status().as_u16() == 404)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(PipelineError::infra(
                SERVICE,
                format!("HeadObject {}/{}: {}", self.bucket, key, DisplayErrorContext(&e)),
            )),
        }
    }

    async fn put(&self, key: &str, path: &Path, content_type: &str) -> Result<(), PipelineError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| PipelineError::io(path, std::io::Error::other(e)))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::infra(
                    SERVICE,
                    format!("PutObject {}/{}: {}", self.bucket, key, DisplayErrorContext(&e)),
                )
            })?;
        Ok(())
    }
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// Store that mirrors objects under `{root}/{bucket}/{key}`.
///
/// Content types are not persisted.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        let path = self.object_path(key);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| PipelineError::io(&path, e))
    }

    async fn put(&self, key: &str, path: &Path, _content_type: &str) -> Result<(), PipelineError> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| PipelineError::io(&dest, e))?;
        Ok(())
    }
}
