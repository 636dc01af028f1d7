//! Changes and the midpoint computation used for bisection.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::model::{Commit, Patch, Repositories};
use crate::services::gitiles::{CommitInfo, RevisionApi};

/// The range between two changes cannot be bisected further.
///
/// Explore treats this as "this pair is terminal", not as a job failure.
#[derive(Debug, Error)]
#[error("the commit range is not linear: {0}")]
pub struct NonLinearError(pub String);

#[derive(Debug, Error)]
#[error("a change requires at least one commit")]
pub struct InvalidChangeError;

/// A fully-specified source state: an ordered commit tuple plus an optional
/// patch. The first commit is the base repository; later commits pin
/// dependency repositories. The last commit is the bisectable one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    commits: Vec<Commit>,
    patch: Option<Patch>,
}

impl Change {
    pub fn new(commits: Vec<Commit>, patch: Option<Patch>) -> Result<Self, InvalidChangeError> {
        if commits.is_empty() {
            return Err(InvalidChangeError);
        }
        Ok(Self { commits, patch })
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    pub fn base_commit(&self) -> &Commit {
        &self.commits[0]
    }

    /// The commit bisection operates on.
    pub fn last_commit(&self) -> &Commit {
        self.commits.last().expect("a change always has commits")
    }

    /// Dependency commits: everything but the base.
    pub fn deps(&self) -> &[Commit] {
        &self.commits[1..]
    }

    /// A stable canonical key for this change, used by the isolate cache and
    /// the device-affinity counters. Unlike `Display`, hashes are not
    /// shortened.
    pub fn id_string(&self) -> String {
        let mut id = self
            .commits
            .iter()
            .map(|c| format!("{}@{}", c.repository, c.git_hash))
            .collect::<Vec<_>>()
            .join(",");
        if let Some(patch) = &self.patch {
            id.push_str(&format!("+{}/{}/{}", patch.server, patch.change, patch.revision));
        }
        id
    }

    /// Parse a change dict: `{"commits": [{"repository", "git_hash"}, ...],
    /// "patch": {"server", "change", "revision"}?}`. Repository names are
    /// validated against the registry.
    pub fn from_dict(value: &serde_json::Value, repositories: &Repositories) -> Result<Self> {
        #[derive(Deserialize)]
        struct ChangeDict {
            commits: Vec<CommitDict>,
            patch: Option<Patch>,
        }
        #[derive(Deserialize)]
        struct CommitDict {
            repository: String,
            git_hash: String,
        }

        let dict: ChangeDict =
            serde_json::from_value(value.clone()).context("malformed change dict")?;
        let commits = dict
            .commits
            .iter()
            .map(|c| Commit::from_fields(&c.repository, &c.git_hash, repositories))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(commits, dict.patch)?)
    }

    /// Stable JSON projection for external consumers.
    pub fn as_dict(&self) -> serde_json::Value {
        let mut dict = json!({
            "commits": self.commits.iter().map(Commit::as_dict).collect::<Vec<_>>(),
        });
        if let Some(patch) = &self.patch {
            dict["patch"] = patch.as_dict();
        }
        dict
    }

    /// The commits strictly between `last_commit(a)` (exclusive) and
    /// `last_commit(b)` (inclusive) along first-parent history, oldest first.
    pub async fn commit_range(
        a: &Commit,
        b: &Commit,
        revisions: &dyn RevisionApi,
        repositories: &Repositories,
    ) -> Result<Vec<CommitInfo>> {
        if a.repository != b.repository {
            return Err(NonLinearError(format!(
                "commits are in different repositories: {} and {}",
                a.repository, b.repository
            ))
            .into());
        }
        let url = a.repository_url(repositories)?;
        let range = revisions
            .commit_range(url, &a.git_hash, &b.git_hash)
            .await
            .with_context(|| format!("fetching commit range {}..{}", a, b))?;
        Ok(range)
    }

    /// The change halfway between `a` and `b` on first-parent history,
    /// carrying forward `b`'s dependency commits and dropping any patch.
    ///
    /// Fails with [`NonLinearError`] when `a` carries a patch, when the two
    /// changes share a last commit but differ elsewhere (dependency bisection
    /// is deliberately unsupported), or when the changes are already
    /// adjacent. Even-length ranges resolve to the older central commit so
    /// bisection is deterministic.
    pub async fn midpoint(
        a: &Change,
        b: &Change,
        revisions: &dyn RevisionApi,
        repositories: &Repositories,
    ) -> Result<Change> {
        if a.patch.is_some() {
            return Err(NonLinearError(
                "a patched change cannot be compared with later revisions".to_string(),
            )
            .into());
        }

        let commit_a = a.last_commit();
        let commit_b = b.last_commit();
        if commit_a == commit_b {
            if a.commits != b.commits {
                return Err(NonLinearError(
                    "dependency bisection is not supported".to_string(),
                )
                .into());
            }
            return Err(NonLinearError("the changes are the same".to_string()).into());
        }

        let range = Self::commit_range(commit_a, commit_b, revisions, repositories).await?;
        if range.len() <= 1 {
            return Err(NonLinearError(format!(
                "the changes {} and {} are adjacent",
                a, b
            ))
            .into());
        }

        let mid = &range[(range.len() - 1) / 2];
        let mut commits = b.commits.clone();
        *commits.last_mut().expect("a change always has commits") =
            Commit::new(commit_b.repository.clone(), mid.git_hash.clone());
        Ok(Change {
            commits,
            patch: None,
        })
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let commits = self
            .commits
            .iter()
            .map(Commit::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        match &self.patch {
            Some(patch) => write!(f, "{} + {}", commits, patch),
            None => write!(f, "{}", commits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::FakeRevisionApi;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const CHROMIUM_URL: &str = "https://example.googlesource.com/chromium/src";

    fn repositories() -> Repositories {
        Repositories::new(BTreeMap::from([(
            "chromium".to_string(),
            CHROMIUM_URL.to_string(),
        )]))
    }

    fn history(hashes: &[&str]) -> Arc<FakeRevisionApi> {
        let api = Arc::new(FakeRevisionApi::new());
        api.set_history(CHROMIUM_URL, hashes);
        api
    }

    fn change(hash: &str) -> Change {
        Change::new(vec![Commit::new("chromium", hash)], None).unwrap()
    }

    #[test]
    fn new_rejects_empty_commits() {
        assert!(Change::new(vec![], None).is_err());
    }

    #[test]
    fn display_includes_patch() {
        let change = Change::new(
            vec![Commit::new("chromium", "f9f2b720abc")],
            Some(Patch::new("https://example.org", 672011, "2f0d")),
        )
        .unwrap();
        assert_eq!(change.to_string(), "chromium@f9f2b72 + 672011/2f0d");
    }

    #[test]
    fn id_string_is_stable_and_complete() {
        let change = Change::new(
            vec![
                Commit::new("chromium", "f9f2b720abc"),
                Commit::new("chromium", "dep hash"),
            ],
            Some(Patch::new("https://example.org", 672011, "2f0d")),
        )
        .unwrap();
        assert_eq!(
            change.id_string(),
            "chromium@f9f2b720abc,chromium@dep hash+https://example.org/672011/2f0d"
        );
    }

    #[test]
    fn from_dict_round_trips() {
        let original = Change::new(
            vec![Commit::new("chromium", "f9f2b720")],
            Some(Patch::new("https://example.org", 672011, "2f0d")),
        )
        .unwrap();
        let parsed = Change::from_dict(&original.as_dict(), &repositories()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn from_dict_rejects_unknown_repository() {
        let dict = json!({"commits": [{"repository": "v8", "git_hash": "aaa"}]});
        assert!(Change::from_dict(&dict, &repositories()).is_err());
    }

    #[tokio::test]
    async fn midpoint_of_odd_range_is_central_commit() {
        let revisions = history(&["c0", "c1", "c2", "c3", "c4"]);
        let mid = Change::midpoint(&change("c0"), &change("c4"), &*revisions, &repositories())
            .await
            .unwrap();
        // Range is [c1, c2, c3, c4]; centers are c2 and c3; pick the older.
        assert_eq!(mid.last_commit().git_hash, "c2");
    }

    #[tokio::test]
    async fn midpoint_of_even_range_prefers_older_commit() {
        let revisions = history(&["c0", "c1", "c2", "c3"]);
        let mid = Change::midpoint(&change("c0"), &change("c3"), &*revisions, &repositories())
            .await
            .unwrap();
        // Range is [c1, c2, c3]; the center is c2.
        assert_eq!(mid.last_commit().git_hash, "c2");

        let revisions = history(&["c0", "c1", "c2"]);
        let mid = Change::midpoint(&change("c0"), &change("c2"), &*revisions, &repositories())
            .await
            .unwrap();
        // Range is [c1, c2]; pick the older of the two.
        assert_eq!(mid.last_commit().git_hash, "c1");
    }

    #[tokio::test]
    async fn midpoint_of_adjacent_changes_is_non_linear() {
        let revisions = history(&["c0", "c1"]);
        let err = Change::midpoint(&change("c0"), &change("c1"), &*revisions, &repositories())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<NonLinearError>().is_some());
    }

    #[tokio::test]
    async fn midpoint_refuses_patched_base() {
        let revisions = history(&["c0", "c1", "c2", "c3"]);
        let patched = Change::new(
            vec![Commit::new("chromium", "c0")],
            Some(Patch::new("https://example.org", 672011, "2f0d")),
        )
        .unwrap();
        let err = Change::midpoint(&patched, &change("c3"), &*revisions, &repositories())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<NonLinearError>().is_some());
    }

    #[tokio::test]
    async fn midpoint_refuses_dependency_bisection() {
        let revisions = history(&["c0", "c1", "c2", "c3"]);
        let a = Change::new(
            vec![Commit::new("chromium", "dep1"), Commit::new("chromium", "c3")],
            None,
        )
        .unwrap();
        let b = Change::new(
            vec![Commit::new("chromium", "dep2"), Commit::new("chromium", "c3")],
            None,
        )
        .unwrap();
        let err = Change::midpoint(&a, &b, &*revisions, &repositories())
            .await
            .unwrap_err();
        let non_linear = err.downcast_ref::<NonLinearError>().unwrap();
        assert!(non_linear.to_string().contains("dependency bisection"));
    }

    #[tokio::test]
    async fn midpoint_carries_forward_base_and_drops_patch() {
        let revisions = history(&["c0", "c1", "c2", "c3", "c4"]);
        let a = Change::new(
            vec![Commit::new("chromium", "base"), Commit::new("chromium", "c0")],
            None,
        )
        .unwrap();
        let b = Change::new(
            vec![Commit::new("chromium", "base"), Commit::new("chromium", "c4")],
            Some(Patch::new("https://example.org", 672011, "2f0d")),
        )
        .unwrap();
        let mid = Change::midpoint(&a, &b, &*revisions, &repositories())
            .await
            .unwrap();
        assert_eq!(mid.base_commit(), &Commit::new("chromium", "base"));
        assert_eq!(mid.last_commit().git_hash, "c2");
        assert!(mid.patch().is_none());
    }

    #[tokio::test]
    async fn midpoint_rejects_cross_repository_ranges() {
        let revisions = history(&["c0", "c1", "c2"]);
        let repositories = Repositories::new(BTreeMap::from([
            ("chromium".to_string(), CHROMIUM_URL.to_string()),
            ("v8".to_string(), "https://example.googlesource.com/v8".to_string()),
        ]));
        let a = change("c0");
        let b = Change::new(vec![Commit::new("v8", "c2")], None).unwrap();
        let err = Change::midpoint(&a, &b, &*revisions, &repositories)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<NonLinearError>().is_some());
    }
}
