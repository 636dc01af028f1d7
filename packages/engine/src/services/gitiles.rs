//! Revision service: commit metadata and first-parent commit ranges.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gitiles responses are JSON with an anti-XSSI prefix.
const JSON_PREFIX: &str = ")]}'";

/// Metadata for one commit, as needed for midpoints and bug comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub git_hash: String,
    pub subject: String,
    pub author: String,
    pub time: String,
}

/// Read access to source-control history.
#[async_trait]
pub trait RevisionApi: Send + Sync {
    /// Metadata for a single commit.
    async fn commit_info(&self, repository_url: &str, git_hash: &str) -> Result<CommitInfo>;

    /// The commits strictly after `first` up to and including `last`, along
    /// first-parent history, oldest first. Implementations must fail when
    /// `first` is not an ancestor of `last`.
    async fn commit_range(
        &self,
        repository_url: &str,
        first: &str,
        last: &str,
    ) -> Result<Vec<CommitInfo>>;
}

/// Gitiles client using direct JSON API calls.
pub struct GitilesClient {
    client: Client,
}

#[derive(Deserialize)]
struct LogResponse {
    log: Vec<LogEntry>,
}

#[derive(Deserialize)]
struct LogEntry {
    commit: String,
    message: String,
    author: Identity,
    committer: Identity,
}

#[derive(Deserialize)]
struct Identity {
    email: Option<String>,
    time: Option<String>,
}

impl LogEntry {
    fn into_commit_info(self) -> CommitInfo {
        CommitInfo {
            git_hash: self.commit,
            subject: self.message.lines().next().unwrap_or_default().to_string(),
            author: self.author.email.unwrap_or_default(),
            time: self.committer.time.unwrap_or_default(),
        }
    }
}

impl GitilesClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client })
    }

    async fn get_json<R: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<R> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to send request to the revision service")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("revision service error: {} - {}", status, text);
        }

        let body = response
            .text()
            .await
            .context("failed to read revision service response")?;
        let body = body.strip_prefix(JSON_PREFIX).unwrap_or(&body);
        serde_json::from_str(body).context("failed to parse revision service response")
    }
}

#[async_trait]
impl RevisionApi for GitilesClient {
    async fn commit_info(&self, repository_url: &str, git_hash: &str) -> Result<CommitInfo> {
        let url = format!("{}/+/{}?format=JSON", repository_url, git_hash);
        let entry: LogEntry = self.get_json(&url).await?;
        Ok(entry.into_commit_info())
    }

    async fn commit_range(
        &self,
        repository_url: &str,
        first: &str,
        last: &str,
    ) -> Result<Vec<CommitInfo>> {
        let url = format!(
            "{}/+log/{}..{}?format=JSON&n=1000",
            repository_url, first, last
        );
        let response: LogResponse = self.get_json(&url).await?;
        // Gitiles returns newest first; callers want oldest first.
        let mut commits: Vec<CommitInfo> = response
            .log
            .into_iter()
            .map(LogEntry::into_commit_info)
            .collect();
        commits.reverse();
        Ok(commits)
    }
}
