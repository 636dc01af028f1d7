//! Artifact store: content-addressed retrieval of build and test outputs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[async_trait]
pub trait IsolateApi: Send + Sync {
    /// Fetch the raw content stored under `digest` on `server`.
    async fn retrieve(&self, server: &str, digest: &str) -> Result<Vec<u8>>;
}

/// Isolate server client using direct content fetches.
pub struct IsolateClient {
    client: Client,
}

impl IsolateClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl IsolateApi for IsolateClient {
    async fn retrieve(&self, server: &str, digest: &str) -> Result<Vec<u8>> {
        let url = format!("{}/content/{}", server, digest);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to fetch from the isolate server")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("isolate server error: {} - {}", status, text);
        }

        let bytes = response
            .bytes()
            .await
            .context("failed to read isolate content")?;
        Ok(bytes.to_vec())
    }
}
