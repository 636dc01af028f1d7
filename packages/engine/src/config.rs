//! Environment-driven configuration for the `bisectd` binary.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Public base URL used in job links and bug comments.
    pub base_url: String,
    pub buildbucket_url: String,
    pub swarming_url: String,
    pub issue_tracker_url: String,
    /// Repository name to canonical URL, as a JSON object.
    pub repositories: BTreeMap<String, String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("PORT must be a number")?;
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));
        let buildbucket_url =
            std::env::var("BUILDBUCKET_URL").context("BUILDBUCKET_URL is not set")?;
        let swarming_url = std::env::var("SWARMING_URL").context("SWARMING_URL is not set")?;
        let issue_tracker_url =
            std::env::var("ISSUE_TRACKER_URL").context("ISSUE_TRACKER_URL is not set")?;
        let repositories = std::env::var("REPOSITORIES")
            .ok()
            .map(|raw| serde_json::from_str(&raw).context("REPOSITORIES must be a JSON object"))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database_url,
            port,
            base_url,
            buildbucket_url,
            swarming_url,
            issue_tracker_url,
            repositories,
        })
    }
}
