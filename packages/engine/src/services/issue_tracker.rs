//! Issue tracker: posting progress and result comments on bugs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn add_comment(&self, bug_id: i64, comment: &str, send_email: bool) -> Result<()>;
}

/// Issue tracker client using direct API calls.
pub struct IssueTrackerClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct AddCommentRequest<'a> {
    content: &'a str,
    send_email: bool,
}

impl IssueTrackerClient {
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
impl IssueTracker for IssueTrackerClient {
    async fn add_comment(&self, bug_id: i64, comment: &str, send_email: bool) -> Result<()> {
        let url = format!("{}/issues/{}/comments", self.base_url, bug_id);
        let response = self
            .client
            .post(&url)
            .json(&AddCommentRequest {
                content: comment,
                send_email,
            })
            .send()
            .await
            .context("failed to post bug comment")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("issue tracker error: {} - {}", status, text);
        }

        Ok(())
    }
}
