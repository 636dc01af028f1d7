//! The job model and its tick scheduler.
//!
//! A job runs as a sequence of ticks. Each tick is one cooperative pass
//! delivered through the task queue: explore (maybe), poll every live
//! execution once, then either re-enqueue a tick or complete. The whole job
//! is persisted after every tick; the task name doubles as the "running"
//! marker.

use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::args::{ComparisonMode, JobArguments};
use crate::kernel::{EngineDeps, TaskQueueError, TaskSpec};
use crate::model::Change;
use crate::state::JobState;

/// Countdown on every tick task. Short enough to keep polling overhead low
/// while waiting on builds and tests, long enough not to hammer anything.
const TASK_INTERVAL_SECS: u64 = 10;

/// Version tag on the persisted encoding. Bump on incompatible changes;
/// loads of unknown versions fail loudly instead of dropping fields.
pub const STATE_VERSION: u32 = 1;

/// Opaque job identifier, rendered as a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn generate() -> Self {
        let (high, _) = Uuid::new_v4().as_u64_pair();
        Self(high)
    }

    /// The persistence key for this job.
    pub fn key(&self) -> String {
        format!("Job:{:x}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(Self)
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct Job {
    #[builder(default = JobId::generate())]
    pub id: JobId,

    #[builder(default = STATE_VERSION)]
    pub version: u32,

    #[builder(default = Utc::now())]
    pub created: DateTime<Utc>,
    /// Not auto-updated on persist: data migrations must be able to touch a
    /// job without moving its completion time.
    #[builder(default = Utc::now())]
    pub updated: DateTime<Utc>,

    /// The name of the queue task this job is running on. Present iff the
    /// job is running.
    #[builder(default, setter(strip_option))]
    pub task: Option<String>,

    /// The rendered error that stopped the job. Present iff the job failed.
    #[builder(default, setter(strip_option))]
    pub exception: Option<String>,

    /// The original request, kept verbatim.
    pub arguments: JobArguments,

    /// If true, the engine picks additional changes to run (bisect). If
    /// false, only the changes given by the user are run.
    #[builder(default)]
    pub auto_explore: bool,

    #[builder(default, setter(strip_option))]
    pub bug_id: Option<i64>,

    #[builder(default, setter(strip_option))]
    pub comparison_mode: Option<ComparisonMode>,

    #[builder(default)]
    pub tags: BTreeMap<String, String>,

    #[builder(default, setter(strip_option))]
    pub user: Option<String>,

    pub state: JobState,
}

impl Job {
    pub fn status(&self) -> JobStatus {
        if self.task.is_some() {
            JobStatus::Running
        } else if self.exception.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}/job/{}", base_url, self.id)
    }

    /// Kick the job off: enqueue its first tick and persist.
    pub async fn start(&mut self, deps: &EngineDeps) -> Result<()> {
        self.schedule(deps).await?;
        deps.store.put(self).await?;

        let comment = format!("Bisection job started.\n{}", self.url(&deps.base_url));
        self.post_bug_comment(deps, &comment, false).await;
        Ok(())
    }

    /// Run one tick. On error the job is marked failed and persisted, and
    /// the error propagates so the task queue registers the failed delivery
    /// and retries.
    pub async fn run(&mut self, deps: &EngineDeps) -> Result<()> {
        self.exception = None; // In case the job succeeds on retry.
        self.task = None; // In case an error is thrown below.

        let result = self.run_inner(deps).await;
        self.updated = Utc::now();

        match result {
            Ok(()) => deps.store.put(self).await,
            Err(err) => {
                self.fail(&err, deps).await;
                if let Err(store_err) = deps.store.put(self).await {
                    error!(job_id = %self.id, error = %store_err, "failed to persist failed job");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self, deps: &EngineDeps) -> Result<()> {
        if self.auto_explore {
            self.state.explore(deps).await.context("exploring changes")?;
        }

        let work_left = self.state.schedule_work(deps).await;

        if work_left {
            self.schedule(deps).await?;
        } else {
            self.complete(deps).await?;
        }
        Ok(())
    }

    /// Enqueue the next tick under a fresh name. The queue's named-task
    /// deduplication rejects duplicate deliveries, so a job never has two
    /// ticks in flight.
    async fn schedule(&mut self, deps: &EngineDeps) -> Result<()> {
        let task = TaskSpec {
            name: Uuid::new_v4().to_string(),
            url: format!("/api/run/{}", self.id),
            countdown_secs: TASK_INTERVAL_SECS,
        };

        let result = match deps.task_queue.add(&task).await {
            Err(TaskQueueError::DeadlineExceeded) => {
                warn!(job_id = %self.id, "task enqueue deadline exceeded, retrying once");
                deps.task_queue.add(&task).await
            }
            other => other,
        };
        result.context("enqueuing job tick")?;

        self.task = Some(task.name);
        Ok(())
    }

    async fn complete(&mut self, deps: &EngineDeps) -> Result<()> {
        let differences: Vec<(usize, Change)> = self
            .state
            .differences()
            .into_iter()
            .map(|(index, change)| (index, change.clone()))
            .collect();
        info!(job_id = %self.id, culprits = differences.len(), "job completed");

        if self.bug_id.is_none() {
            return Ok(());
        }

        let status = match differences.len() {
            0 => "Couldn't reproduce a difference.".to_string(),
            1 => "Found a significant difference after 1 commit.".to_string(),
            count => format!(
                "Found significant differences after each of {} commits.",
                count
            ),
        };

        let mut sections = vec![format!("{}\n{}", status, self.url(&deps.base_url))];
        for (_, change) in &differences {
            sections.push(format_change_for_bug(change, deps).await?);
        }

        let comment = sections.join("\n\n");
        self.post_bug_comment(deps, &comment, true).await;
        Ok(())
    }

    async fn fail(&mut self, err: &anyhow::Error, deps: &EngineDeps) {
        error!(job_id = %self.id, error = %format!("{err:#}"), "job failed");
        self.exception = Some(format!("{err:#}"));

        let comment = format!(
            "The bisection job stopped with an error.\n{}",
            self.url(&deps.base_url)
        );
        self.post_bug_comment(deps, &comment, true).await;
    }

    async fn post_bug_comment(&self, deps: &EngineDeps, comment: &str, send_email: bool) {
        let Some(bug_id) = self.bug_id else {
            return;
        };
        if let Err(err) = deps
            .issue_tracker
            .add_comment(bug_id, comment, send_email)
            .await
        {
            warn!(job_id = %self.id, bug_id, error = %err, "failed to post bug comment");
        }
    }

    pub fn as_dict(&self, base_url: &str, include_state: bool) -> serde_json::Value {
        let mut dict = json!({
            "job_id": self.id.to_string(),
            "job_url": self.url(base_url),
            "arguments": self.arguments,
            "auto_explore": self.auto_explore,
            "bug_id": self.bug_id,
            "comparison_mode": self.comparison_mode,
            "tags": self.tags,
            "user": self.user,
            "created": self.created.to_rfc3339(),
            "updated": self.updated.to_rfc3339(),
            "exception": self.exception,
            "status": self.status(),
        });
        if include_state {
            if let (Some(dict), serde_json::Value::Object(state)) =
                (dict.as_object_mut(), self.state.as_dict())
            {
                dict.extend(state);
            }
        }
        dict
    }
}

/// One bug-comment section per culprit: subject, byline, and a repo link.
async fn format_change_for_bug(change: &Change, deps: &EngineDeps) -> Result<String> {
    let commit = change.last_commit();
    let repository_url = commit.repository_url(&deps.repositories)?;
    let info = deps
        .revisions
        .commit_info(repository_url, &commit.git_hash)
        .await
        .context("fetching culprit commit info")?;
    Ok(format!(
        "{}\nBy {} - {}\n{} @ {}",
        info.subject, info.author, info.time, commit.repository, commit.git_hash
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DEFAULT_REPEAT_COUNT;

    fn job() -> Job {
        Job::builder()
            .arguments(JobArguments::default())
            .state(JobState::new(Vec::new(), DEFAULT_REPEAT_COUNT))
            .build()
    }

    #[test]
    fn job_id_round_trips_through_hex() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn job_id_key_is_prefixed() {
        let id: JobId = "1a2b".parse().unwrap();
        assert_eq!(id.key(), "Job:1a2b");
    }

    #[test]
    fn status_running_when_task_is_set() {
        let mut job = job();
        job.task = Some("task-name".to_string());
        assert_eq!(job.status(), JobStatus::Running);
    }

    #[test]
    fn status_failed_when_exception_is_set() {
        let mut job = job();
        job.exception = Some("trace".to_string());
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn status_completed_otherwise() {
        assert_eq!(job().status(), JobStatus::Completed);
    }

    #[test]
    fn as_dict_includes_status_and_url() {
        let dict = job().as_dict("https://bisect.example.org", true);
        assert_eq!(dict["status"], "Completed");
        assert!(dict["job_url"].as_str().unwrap().starts_with("https://"));
        assert!(dict.get("quests").is_some());
    }
}
