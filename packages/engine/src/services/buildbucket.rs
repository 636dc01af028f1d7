//! Build service: dispatch builds and poll their status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A build request. `properties` carries the revision pins
/// (`parent_got_revision`, `deps_revision_overrides`), any patch fields, and
/// `clobber`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub builder_name: String,
    pub properties: serde_json::Value,
}

/// A build's current state. `status` is `SCHEDULED`, `STARTED`, or
/// `COMPLETED`; `result` is only present once completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

pub const BUILD_COMPLETED: &str = "COMPLETED";
pub const BUILD_SUCCESS: &str = "SUCCESS";

#[async_trait]
pub trait BuildApi: Send + Sync {
    /// Dispatch a build; returns the build id.
    async fn put(&self, bucket: &str, request: &BuildRequest) -> Result<String>;

    /// Poll a build's status.
    async fn status(&self, build_id: &str) -> Result<BuildStatus>;
}

/// Buildbucket client using direct API calls.
pub struct BuildbucketClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    bucket: &'a str,
    #[serde(flatten)]
    request: &'a BuildRequest,
}

#[derive(Deserialize)]
struct BuildEnvelope {
    build: BuildBody,
}

#[derive(Deserialize)]
struct BuildBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl BuildbucketClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl BuildApi for BuildbucketClient {
    async fn put(&self, bucket: &str, request: &BuildRequest) -> Result<String> {
        let url = format!("{}/builds", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&PutRequest { bucket, request })
            .send()
            .await
            .context("failed to send build request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("build service error: {} - {}", status, text);
        }

        let envelope: BuildEnvelope = response
            .json()
            .await
            .context("failed to parse build response")?;
        envelope
            .build
            .id
            .context("build response did not include a build id")
    }

    async fn status(&self, build_id: &str) -> Result<BuildStatus> {
        let url = format!("{}/builds/{}", self.base_url, build_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to query build status")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("build service error: {} - {}", status, text);
        }

        let envelope: BuildEnvelope = response
            .json()
            .await
            .context("failed to parse build status response")?;
        Ok(BuildStatus {
            status: envelope.build.status.unwrap_or_default(),
            result: envelope.build.result,
            url: envelope.build.url,
        })
    }
}
