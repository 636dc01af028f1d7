//! Job-creation arguments and their validation.
//!
//! The request body is kept verbatim on the job (it is the job's recipe);
//! everything the engine consumes is validated up front so a malformed
//! request never becomes a half-configured job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Change, Commit, Patch, Repositories};
use crate::services::swarming::Dimension;

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("missing required argument \"{0}\"")]
    Missing(&'static str),
    #[error("invalid argument \"{name}\": {message}")]
    Invalid {
        name: &'static str,
        message: String,
    },
}

/// Whether a job compares pass/fail behavior or measured performance.
/// Accepted and surfaced with the job; the core comparison logic treats
/// both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    Functional,
    Performance,
}

/// The job-creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobArguments {
    pub target: Option<String>,
    pub repository: Option<String>,
    pub start_git_hash: Option<String>,
    pub end_git_hash: Option<String>,
    /// Explicit change dicts, overriding start/end.
    pub changes: Option<Vec<serde_json::Value>>,
    pub patch: Option<Patch>,
    pub auto_explore: bool,
    pub bug_id: Option<i64>,
    pub comparison_mode: Option<ComparisonMode>,
    pub tags: BTreeMap<String, String>,
    pub user: Option<String>,

    // Stage configuration.
    pub builder: Option<String>,
    pub dimensions: Option<Vec<Dimension>>,
    pub extra_test_args: Option<Vec<String>>,
    pub chart: Option<String>,
    pub tir_label: Option<String>,
    pub trace: Option<String>,
}

impl JobArguments {
    /// The changes this job starts from: either the explicit `changes`
    /// array, or (start, end) built from the repository and hash fields,
    /// with any patch applied to the end change.
    pub fn validate_changes(
        &self,
        repositories: &Repositories,
    ) -> Result<Vec<Change>, ArgumentError> {
        if let Some(dicts) = &self.changes {
            if dicts.is_empty() {
                return Err(ArgumentError::Invalid {
                    name: "changes",
                    message: "must not be empty".to_string(),
                });
            }
            return dicts
                .iter()
                .map(|dict| {
                    Change::from_dict(dict, repositories).map_err(|err| ArgumentError::Invalid {
                        name: "changes",
                        message: format!("{err:#}"),
                    })
                })
                .collect();
        }

        let repository = self
            .repository
            .as_deref()
            .ok_or(ArgumentError::Missing("repository"))?;
        let start = self
            .start_git_hash
            .as_deref()
            .ok_or(ArgumentError::Missing("start_git_hash"))?;
        let end = self
            .end_git_hash
            .as_deref()
            .ok_or(ArgumentError::Missing("end_git_hash"))?;

        let start_commit = commit_from_fields(repository, start, repositories)?;
        let end_commit = commit_from_fields(repository, end, repositories)?;

        let start_change = change_from_commits(vec![start_commit], None)?;
        let end_change = change_from_commits(vec![end_commit], self.patch.clone())?;
        Ok(vec![start_change, end_change])
    }
}

fn commit_from_fields(
    repository: &str,
    git_hash: &str,
    repositories: &Repositories,
) -> Result<Commit, ArgumentError> {
    Commit::from_fields(repository, git_hash, repositories).map_err(|err| {
        ArgumentError::Invalid {
            name: "repository",
            message: err.to_string(),
        }
    })
}

fn change_from_commits(
    commits: Vec<Commit>,
    patch: Option<Patch>,
) -> Result<Change, ArgumentError> {
    Change::new(commits, patch).map_err(|err| ArgumentError::Invalid {
        name: "changes",
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repositories() -> Repositories {
        Repositories::new(BTreeMap::from([(
            "chromium".to_string(),
            "https://example.googlesource.com/chromium/src".to_string(),
        )]))
    }

    fn arguments() -> JobArguments {
        JobArguments {
            repository: Some("chromium".to_string()),
            start_git_hash: Some("aaa".to_string()),
            end_git_hash: Some("bbb".to_string()),
            ..JobArguments::default()
        }
    }

    #[test]
    fn start_and_end_become_two_changes() {
        let changes = arguments().validate_changes(&repositories()).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].last_commit().git_hash, "aaa");
        assert_eq!(changes[1].last_commit().git_hash, "bbb");
    }

    #[test]
    fn patch_applies_to_the_end_change() {
        let mut args = arguments();
        args.patch = Some(Patch::new("https://example.org", 672011, "2f0d"));
        let changes = args.validate_changes(&repositories()).unwrap();
        assert!(changes[0].patch().is_none());
        assert!(changes[1].patch().is_some());
    }

    #[test]
    fn explicit_changes_override_start_and_end() {
        let mut args = arguments();
        args.changes = Some(vec![
            serde_json::json!({"commits": [{"repository": "chromium", "git_hash": "ccc"}]}),
        ]);
        let changes = args.validate_changes(&repositories()).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].last_commit().git_hash, "ccc");
    }

    #[test]
    fn missing_repository_is_reported() {
        let mut args = arguments();
        args.repository = None;
        assert!(matches!(
            args.validate_changes(&repositories()),
            Err(ArgumentError::Missing("repository"))
        ));
    }

    #[test]
    fn unknown_repository_is_reported() {
        let mut args = arguments();
        args.repository = Some("v8".to_string());
        assert!(matches!(
            args.validate_changes(&repositories()),
            Err(ArgumentError::Invalid { name: "repository", .. })
        ));
    }
}
