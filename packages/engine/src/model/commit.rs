//! Commits, patches, and the repository registry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown repository \"{0}\"")]
pub struct UnknownRepositoryError(pub String);

/// Registry of repository names to canonical URLs.
///
/// Commits refer to repositories by symbolic name; every name used in a
/// request must resolve here. The registry is loaded from configuration at
/// startup and injected alongside the other collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repositories {
    urls: BTreeMap<String, String>,
}

impl Repositories {
    pub fn new(urls: BTreeMap<String, String>) -> Self {
        Self { urls }
    }

    /// Resolve a repository name to its canonical URL.
    pub fn url(&self, name: &str) -> Result<&str, UnknownRepositoryError> {
        self.urls
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| UnknownRepositoryError(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.urls.contains_key(name)
    }
}

/// A commit in a known repository. Immutable; equality by both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub repository: String,
    pub git_hash: String,
}

impl Commit {
    pub fn new(repository: impl Into<String>, git_hash: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            git_hash: git_hash.into(),
        }
    }

    /// Build a commit from request fields, validating the repository name.
    pub fn from_fields(
        repository: &str,
        git_hash: &str,
        repositories: &Repositories,
    ) -> Result<Self, UnknownRepositoryError> {
        if !repositories.contains(repository) {
            return Err(UnknownRepositoryError(repository.to_string()));
        }
        Ok(Self::new(repository, git_hash))
    }

    /// The canonical URL of this commit's repository.
    pub fn repository_url<'a>(
        &self,
        repositories: &'a Repositories,
    ) -> Result<&'a str, UnknownRepositoryError> {
        repositories.url(&self.repository)
    }

    pub fn as_dict(&self) -> serde_json::Value {
        json!({
            "repository": self.repository,
            "git_hash": self.git_hash,
        })
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.git_hash[..self.git_hash.len().min(7)];
        write!(f, "{}@{}", self.repository, short)
    }
}

/// A Gerrit patch. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Patch {
    /// Review server URL.
    pub server: String,
    /// Change number on the review server.
    pub change: i64,
    /// Patch set revision id.
    pub revision: String,
}

impl Patch {
    pub fn new(server: impl Into<String>, change: i64, revision: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            change,
            revision: revision.into(),
        }
    }

    /// The properties a build request needs to apply this patch.
    pub fn build_parameters(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut parameters = serde_json::Map::new();
        parameters.insert("patch_storage".into(), json!("gerrit"));
        parameters.insert("patch_gerrit_url".into(), json!(self.server));
        parameters.insert("patch_change".into(), json!(self.change));
        parameters.insert("patch_set".into(), json!(self.revision));
        parameters
    }

    pub fn as_dict(&self) -> serde_json::Value {
        json!({
            "server": self.server,
            "change": self.change,
            "revision": self.revision,
        })
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.change, self.revision)
    }
}
