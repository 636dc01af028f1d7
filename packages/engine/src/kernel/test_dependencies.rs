//! In-memory fakes for every collaborator, for use in tests.
//!
//! Fakes record their calls and serve scripted responses so tests can drive
//! multi-tick scenarios deterministically without any network or database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::job::{Job, JobId};
use crate::kernel::isolate_cache::{IsolateCache, IsolateRef, PendingBuilds};
use crate::kernel::store::{decode_job, encode_job, JobStore};
use crate::kernel::task_queue::{
    ClaimedTask, EnqueueResult, TaskQueue, TaskQueueError, TaskSpec,
};
use crate::kernel::EngineDeps;
use crate::model::Repositories;
use crate::services::buildbucket::{BuildApi, BuildRequest, BuildStatus};
use crate::services::gitiles::{CommitInfo, RevisionApi};
use crate::services::isolate::IsolateApi;
use crate::services::issue_tracker::IssueTracker;
use crate::services::swarming::{OutputsRef, SwarmingApi, TaskRequest, TaskResult};

pub const TEST_REPOSITORY: &str = "chromium";
pub const TEST_REPOSITORY_URL: &str = "https://example.googlesource.com/chromium/src";
pub const TEST_DEP_REPOSITORY: &str = "catapult";
pub const TEST_DEP_REPOSITORY_URL: &str = "https://example.googlesource.com/catapult";

// =============================================================================
// Job store
// =============================================================================

/// Job store backed by a map of encoded blobs. Round-trips through the real
/// versioned encoding so persistence bugs show up in tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let value = encode_job(job)?;
        self.jobs.lock().unwrap().insert(job.id.key(), value);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let value = self.jobs.lock().unwrap().get(&id.key()).cloned();
        value.map(decode_job).transpose()
    }
}

// =============================================================================
// Task queue
// =============================================================================

struct QueuedTask {
    spec: TaskSpec,
    attempt: i32,
    running: bool,
}

/// Task queue that treats every task as immediately due, so tests can drain
/// ticks by hand. Duplicate names are rejected for the queue's lifetime.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<QueuedTask>>,
    seen_names: Mutex<HashSet<String>>,
    added: AtomicUsize,
    deadline_failures: AtomicUsize,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` adds fail with `DeadlineExceeded`.
    pub fn fail_next_adds_with_deadline(&self, count: usize) {
        self.deadline_failures.store(count, Ordering::SeqCst);
    }

    /// Total successful adds.
    pub fn added_count(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn add(&self, task: &TaskSpec) -> Result<EnqueueResult, TaskQueueError> {
        let failures = self.deadline_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.deadline_failures.store(failures - 1, Ordering::SeqCst);
            return Err(TaskQueueError::DeadlineExceeded);
        }

        if !self.seen_names.lock().unwrap().insert(task.name.clone()) {
            return Ok(EnqueueResult::Duplicate);
        }

        self.tasks.lock().unwrap().push(QueuedTask {
            spec: task.clone(),
            attempt: 0,
            running: false,
        });
        self.added.fetch_add(1, Ordering::SeqCst);
        Ok(EnqueueResult::Created)
    }

    async fn claim_due(&self, limit: i64) -> Result<Vec<ClaimedTask>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut claimed = Vec::new();
        for task in tasks.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if task.running {
                continue;
            }
            task.running = true;
            task.attempt += 1;
            claimed.push(ClaimedTask {
                name: task.spec.name.clone(),
                url: task.spec.url.clone(),
                attempt: task.attempt,
            });
        }
        Ok(claimed)
    }

    async fn mark_done(&self, name: &str) -> Result<()> {
        self.tasks.lock().unwrap().retain(|task| task.spec.name != name);
        Ok(())
    }

    async fn mark_failed(&self, name: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|task| task.spec.name == name) {
            task.running = false;
        }
        Ok(())
    }
}

// =============================================================================
// Isolate cache and pending-build index
// =============================================================================

#[derive(Default)]
pub struct InMemoryIsolateCache {
    entries: Mutex<HashMap<(String, String, String), IsolateRef>>,
}

impl InMemoryIsolateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IsolateCache for InMemoryIsolateCache {
    async fn get(
        &self,
        builder: &str,
        change_id: &str,
        target: &str,
    ) -> Result<Option<IsolateRef>> {
        let key = (builder.to_string(), change_id.to_string(), target.to_string());
        Ok(self.entries.lock().unwrap().get(&key).cloned())
    }

    async fn put(
        &self,
        builder: &str,
        change_id: &str,
        target: &str,
        isolate: &IsolateRef,
    ) -> Result<()> {
        let key = (builder.to_string(), change_id.to_string(), target.to_string());
        self.entries
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| isolate.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPendingBuilds {
    builds: Mutex<HashMap<String, String>>,
}

impl InMemoryPendingBuilds {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingBuilds for InMemoryPendingBuilds {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.builds.lock().unwrap().get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, build_id: &str) -> Result<String> {
        let mut builds = self.builds.lock().unwrap();
        Ok(builds
            .entry(key.to_string())
            .or_insert_with(|| build_id.to_string())
            .clone())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.builds.lock().unwrap().remove(key);
        Ok(())
    }
}

// =============================================================================
// Revision service
// =============================================================================

/// Revision service over scripted linear histories (oldest first).
#[derive(Default)]
pub struct FakeRevisionApi {
    histories: Mutex<HashMap<String, Vec<String>>>,
    infos: Mutex<HashMap<String, CommitInfo>>,
}

impl FakeRevisionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_history(&self, repository_url: &str, hashes: &[&str]) {
        self.histories.lock().unwrap().insert(
            repository_url.to_string(),
            hashes.iter().map(|hash| hash.to_string()).collect(),
        );
    }

    pub fn set_commit_info(&self, info: CommitInfo) {
        self.infos.lock().unwrap().insert(info.git_hash.clone(), info);
    }

    fn info_for(&self, git_hash: &str) -> CommitInfo {
        self.infos
            .lock()
            .unwrap()
            .get(git_hash)
            .cloned()
            .unwrap_or_else(|| CommitInfo {
                git_hash: git_hash.to_string(),
                subject: format!("Subject for {}", git_hash),
                author: "author@example.org".to_string(),
                time: "2026-08-01 00:00:00".to_string(),
            })
    }
}

#[async_trait]
impl RevisionApi for FakeRevisionApi {
    async fn commit_info(&self, repository_url: &str, git_hash: &str) -> Result<CommitInfo> {
        let _ = repository_url;
        Ok(self.info_for(git_hash))
    }

    async fn commit_range(
        &self,
        repository_url: &str,
        first: &str,
        last: &str,
    ) -> Result<Vec<CommitInfo>> {
        let histories = self.histories.lock().unwrap();
        let history = histories
            .get(repository_url)
            .ok_or_else(|| anyhow!("unknown repository url {}", repository_url))?;
        let first_position = history
            .iter()
            .position(|hash| hash == first)
            .ok_or_else(|| anyhow!("unknown commit {}", first))?;
        let last_position = history
            .iter()
            .position(|hash| hash == last)
            .ok_or_else(|| anyhow!("unknown commit {}", last))?;
        if last_position <= first_position {
            bail!("{} is not an ancestor of {}", first, last);
        }
        Ok(history[first_position + 1..=last_position]
            .iter()
            .map(|hash| self.info_for(hash))
            .collect())
    }
}

// =============================================================================
// Build service
// =============================================================================

/// Build service that records requests and serves one scripted status.
#[derive(Default)]
pub struct FakeBuildApi {
    requests: Mutex<Vec<(String, BuildRequest)>>,
    status: Mutex<Option<BuildStatus>>,
    status_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeBuildApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: &str, result: Option<&str>, url: Option<&str>) {
        *self.status.lock().unwrap() = Some(BuildStatus {
            status: status.to_string(),
            result: result.map(str::to_string),
            url: url.map(str::to_string),
        });
    }

    pub fn requests(&self) -> Vec<(String, BuildRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildApi for FakeBuildApi {
    async fn put(&self, bucket: &str, request: &BuildRequest) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((bucket.to_string(), request.clone()));
        Ok(format!("build-{}", id))
    }

    async fn status(&self, _build_id: &str) -> Result<BuildStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| BuildStatus {
                status: "SCHEDULED".to_string(),
                result: None,
                url: None,
            }))
    }
}

// =============================================================================
// Task execution service
// =============================================================================

/// Task service that records dispatches and serves scripted results.
///
/// With `echo_outputs` enabled, completed default results echo the task's
/// input isolate back as its output, which lets full-pipeline tests give
/// each change distinct measurements without scripting every task id.
#[derive(Default)]
pub struct FakeSwarmingApi {
    requests: Mutex<Vec<(String, TaskRequest)>>,
    results: Mutex<HashMap<String, TaskResult>>,
    default_result: Mutex<Option<TaskResult>>,
    echo_outputs: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeSwarmingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result(&self, task_id: &str, result: TaskResult) {
        self.results
            .lock()
            .unwrap()
            .insert(task_id.to_string(), result);
    }

    pub fn set_default_result(&self, result: TaskResult) {
        *self.default_result.lock().unwrap() = Some(result);
    }

    pub fn set_echo_outputs(&self, echo: bool) {
        self.echo_outputs.store(echo, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(String, TaskRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn new_task_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn input_isolate(&self, task_id: &str) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, request)| request.properties.inputs_ref.isolated.clone())
    }
}

#[async_trait]
impl SwarmingApi for FakeSwarmingApi {
    async fn new_task(&self, request: &TaskRequest) -> Result<String> {
        let id = format!("task-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.requests
            .lock()
            .unwrap()
            .push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn result(&self, task_id: &str) -> Result<TaskResult> {
        if let Some(result) = self.results.lock().unwrap().get(task_id) {
            return Ok(result.clone());
        }
        let mut result = self
            .default_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| TaskResult {
                state: "PENDING".to_string(),
                bot_id: None,
                exit_code: None,
                failure: false,
                outputs_ref: None,
            });
        if self.echo_outputs.load(Ordering::SeqCst)
            && result.state == "COMPLETED"
            && result.outputs_ref.is_none()
        {
            result.outputs_ref = self
                .input_isolate(task_id)
                .map(|isolated| OutputsRef { isolated });
        }
        Ok(result)
    }
}

// =============================================================================
// Artifact store
// =============================================================================

/// Artifact store over a digest-keyed map; the server name is ignored.
#[derive(Default)]
pub struct FakeIsolateApi {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeIsolateApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, digest: &str, content: Vec<u8>) {
        self.files.lock().unwrap().insert(digest.to_string(), content);
    }

    pub fn put_json(&self, digest: &str, value: serde_json::Value) {
        self.put(digest, value.to_string().into_bytes());
    }
}

#[async_trait]
impl IsolateApi for FakeIsolateApi {
    async fn retrieve(&self, _server: &str, digest: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| anyhow!("no content for digest {}", digest))
    }
}

// =============================================================================
// Issue tracker
// =============================================================================

#[derive(Debug, Clone)]
pub struct BugComment {
    pub bug_id: i64,
    pub comment: String,
    pub send_email: bool,
}

/// Issue tracker that records every comment.
#[derive(Default)]
pub struct FakeIssueTracker {
    comments: Mutex<Vec<BugComment>>,
}

impl FakeIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comments(&self) -> Vec<BugComment> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn add_comment(&self, bug_id: i64, comment: &str, send_email: bool) -> Result<()> {
        self.comments.lock().unwrap().push(BugComment {
            bug_id,
            comment: comment.to_string(),
            send_email,
        });
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// All fakes bundled, with concrete handles for scripting and assertions
/// plus an [`EngineDeps`] view for the code under test.
pub struct TestDeps {
    pub store: Arc<InMemoryJobStore>,
    pub task_queue: Arc<InMemoryTaskQueue>,
    pub revisions: Arc<FakeRevisionApi>,
    pub builds: Arc<FakeBuildApi>,
    pub swarming: Arc<FakeSwarmingApi>,
    pub isolates: Arc<FakeIsolateApi>,
    pub isolate_cache: Arc<InMemoryIsolateCache>,
    pub pending_builds: Arc<InMemoryPendingBuilds>,
    pub issue_tracker: Arc<FakeIssueTracker>,
    pub repositories: Arc<Repositories>,
}

impl TestDeps {
    pub fn new() -> Self {
        let repositories = Repositories::new(
            [
                (TEST_REPOSITORY.to_string(), TEST_REPOSITORY_URL.to_string()),
                (
                    TEST_DEP_REPOSITORY.to_string(),
                    TEST_DEP_REPOSITORY_URL.to_string(),
                ),
            ]
            .into(),
        );
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            task_queue: Arc::new(InMemoryTaskQueue::new()),
            revisions: Arc::new(FakeRevisionApi::new()),
            builds: Arc::new(FakeBuildApi::new()),
            swarming: Arc::new(FakeSwarmingApi::new()),
            isolates: Arc::new(FakeIsolateApi::new()),
            isolate_cache: Arc::new(InMemoryIsolateCache::new()),
            pending_builds: Arc::new(InMemoryPendingBuilds::new()),
            issue_tracker: Arc::new(FakeIssueTracker::new()),
            repositories: Arc::new(repositories),
        }
    }

    pub fn deps(&self) -> EngineDeps {
        EngineDeps::new(
            self.store.clone(),
            self.task_queue.clone(),
            self.revisions.clone(),
            self.builds.clone(),
            self.swarming.clone(),
            self.isolates.clone(),
            self.isolate_cache.clone(),
            self.pending_builds.clone(),
            self.issue_tracker.clone(),
            self.repositories.clone(),
            "https://bisect.example.org".to_string(),
        )
    }
}

impl Default for TestDeps {
    fn default() -> Self {
        Self::new()
    }
}
