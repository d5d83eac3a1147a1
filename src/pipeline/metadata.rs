//! Descriptive metadata lookup: ref id → title, display date and canonical URI.
//!
//! [`MetadataResolver`] is the seam the orchestrator depends on;
//! [`ArchivesSpaceClient`] is the production implementation, talking to the
//! ArchivesSpace backend API over HTTP.
//!
//! ## Lookup sequence
//!
//! ```text
//! POST /users/{user}/login?password=…             → session token
//! GET  /repositories/{repo}/find_by_id/archival_objects?ref_id[]={ref_id}
//! GET  {archival_objects[0].ref}                  → the object record
//! GET  {parent.ref} … {resource.ref}              → only if title/dates missing
//! ```

use crate::error::PipelineError;
use crate::settings::ArchivesSpaceSettings;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const SERVICE: &str = "ArchivesSpace";
const SESSION_HEADER: &str = "X-ArchivesSpace-Session";

/// Upper bound on ancestor hops, in case of a cyclic `parent` chain.
const MAX_ANCESTOR_DEPTH: usize = 32;

/// Descriptive metadata for one archival object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Display title, title-cased.
    pub title: String,
    /// Human-readable date expressions joined with `", "`; may be empty.
    pub dates: String,
    /// Canonical URI of the object; the identifier seed.
    pub uri: String,
}

/// Resolves a ref id to the object's descriptive metadata.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// # Errors
    /// - `NotFound` when no object carries `ref_id`
    /// - `Infrastructure` for transport, authentication or server failures
    async fn resolve(&self, ref_id: &str) -> Result<ObjectMetadata, PipelineError>;
}

// ── ArchivesSpace wire types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoginResponse {
    session: String,
}

#[derive(Debug, Deserialize)]
struct FindByIdResponse {
    #[serde(default)]
    archival_objects: Vec<RecordRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct RecordRef {
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Debug, Default, Deserialize)]
struct ArchivalRecord {
    title: Option<String>,
    display_string: Option<String>,
    #[serde(default)]
    dates: Vec<DateRecord>,
    uri: Option<String>,
    parent: Option<RecordRef>,
    resource: Option<RecordRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DateRecord {
    expression: Option<String>,
    begin: Option<String>,
    end: Option<String>,
}

impl ArchivalRecord {
    fn own_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .or(self.display_string.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

impl DateRecord {
    fn display(&self) -> Option<String> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(expr) = non_empty(&self.expression) {
            return Some(expr);
        }
        match (non_empty(&self.begin), non_empty(&self.end)) {
            (Some(b), Some(e)) => Some(format!("{b}-{e}")),
            (Some(b), None) => Some(b),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }
}

/// HTTP client for the ArchivesSpace backend API.
pub struct ArchivesSpaceClient {
    http: reqwest::Client,
    baseurl: String,
    username: String,
    password: String,
    repository: String,
    session: OnceCell<String>,
}

impl ArchivesSpaceClient {
    pub fn new(settings: &ArchivesSpaceSettings) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| PipelineError::infra(SERVICE, e))?;
        Ok(Self {
            http,
            baseurl: settings.baseurl.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            repository: settings.repository.clone(),
            session: OnceCell::new(),
        })
    }

    /// Log in once and reuse the session token for the client's lifetime.
    async fn session(&self) -> Result<&str, PipelineError> {
        let token = self
            .session
            .get_or_try_init(|| async {
                let url = format!("{}/users/{}/login", self.baseurl, self.username);
                let resp = self
                    .http
                    .post(&url)
                    .query(&[("password", self.password.as_str())])
                    .send()
                    .await
                    .map_err(|e| PipelineError::infra(SERVICE, e))?;
                if !resp.status().is_success() {
                    return Err(PipelineError::infra(
                        SERVICE,
                        format!("login as '{}' failed: HTTP {}", self.username, resp.status()),
                    ));
                }
                let body: LoginResponse = resp.json().await.map_err(|e| PipelineError::infra(SERVICE, e))?;
                debug!("Logged in to {} as {}", self.baseurl, self.username);
                Ok::<_, PipelineError>(body.session)
            })
            .await?;
        Ok(token.as_str())
    }

    /// GET a JSON document; `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, PipelineError> {
        let session = self.session().await?;
        let url = format!("{}{}", self.baseurl, path);
        let resp = self
            .http
            .get(&url)
            .header(SESSION_HEADER, session)
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::infra(SERVICE, e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => resp
                .json()
                .await
                .map(Some)
                .map_err(|e| PipelineError::infra(SERVICE, format!("bad JSON from {path}: {e}"))),
            s => Err(PipelineError::infra(SERVICE, format!("GET {path}: HTTP {s}"))),
        }
    }

    /// Look up `ref_id` and format its title, dates and URI.
    pub async fn get_object(&self, ref_id: &str) -> Result<ObjectMetadata, PipelineError> {
        let not_found = || PipelineError::NotFound {
            ref_id: ref_id.to_string(),
        };

        let found: FindByIdResponse = self
            .get_json(
                &format!("/repositories/{}/find_by_id/archival_objects", self.repository),
                &[("ref_id[]", ref_id)],
            )
            .await?
            .ok_or_else(not_found)?;
        let first = found.archival_objects.into_iter().next().ok_or_else(not_found)?;

        let record: ArchivalRecord = self.get_json(&first.reference, &[]).await?.ok_or_else(not_found)?;

        let title = match record.own_title() {
            Some(t) => t.to_string(),
            None => self.closest_title(&record).await?.unwrap_or_default(),
        };
        let dates = if record.dates.is_empty() {
            self.closest_dates(&record).await?
        } else {
            record.dates.clone()
        };
        let uri = record.uri.clone().unwrap_or(first.reference);

        let meta = ObjectMetadata {
            title: title_case(&title),
            dates: join_dates(&dates),
            uri,
        };
        info!("Resolved ref_id {} to {}", ref_id, meta.uri);
        Ok(meta)
    }

    async fn closest_title(&self, record: &ArchivalRecord) -> Result<Option<String>, PipelineError> {
        for ancestor in self.ancestors(record).await? {
            if let Some(t) = ancestor.own_title() {
                return Ok(Some(t.to_string()));
            }
        }
        Ok(None)
    }

    async fn closest_dates(&self, record: &ArchivalRecord) -> Result<Vec<DateRecord>, PipelineError> {
        for ancestor in self.ancestors(record).await? {
            if !ancestor.dates.is_empty() {
                return Ok(ancestor.dates);
            }
        }
        Ok(Vec::new())
    }

    /// Parent chain, nearest first, followed by the collection resource.
    async fn ancestors(&self, record: &ArchivalRecord) -> Result<Vec<ArchivalRecord>, PipelineError> {
        let mut out = Vec::new();
        let mut next = record.parent.clone();
        while let Some(r) = next.take() {
            if out.len() >= MAX_ANCESTOR_DEPTH {
                break;
            }
            match self.get_json::<ArchivalRecord>(&r.reference, &[]).await? {
                Some(parent) => {
                    next = parent.parent.clone();
                    out.push(parent);
                }
                None => break,
            }
        }
        if let Some(r) = &record.resource {
            if let Some(resource) = self.get_json::<ArchivalRecord>(&r.reference, &[]).await? {
                out.push(resource);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MetadataResolver for ArchivesSpaceClient {
    async fn resolve(&self, ref_id: &str) -> Result<ObjectMetadata, PipelineError> {
        self.get_object(ref_id).await
    }
}

fn join_dates(dates: &[DateRecord]) -> String {
    dates.iter().filter_map(DateRecord::display).collect::<Vec<_>>().join(", ")
}

/// Title-case like Python's `str.title()`: a letter is upper-cased when it
/// does not follow another letter, lower-cased otherwise.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_letter = true;
        } else {
            out.push(c);
            prev_letter = false;
        }
    }
    out
}
