//! Engine dependencies (using traits for testability).
//!
//! This is the central collaborator container passed to the scheduler and to
//! every execution poll. All external services sit behind trait objects so
//! tests can inject fakes.

use std::sync::Arc;

use crate::kernel::isolate_cache::{IsolateCache, PendingBuilds};
use crate::kernel::store::JobStore;
use crate::kernel::task_queue::TaskQueue;
use crate::model::Repositories;
use crate::services::buildbucket::BuildApi;
use crate::services::gitiles::RevisionApi;
use crate::services::isolate::IsolateApi;
use crate::services::issue_tracker::IssueTracker;
use crate::services::swarming::SwarmingApi;

#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn JobStore>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub revisions: Arc<dyn RevisionApi>,
    pub builds: Arc<dyn BuildApi>,
    pub swarming: Arc<dyn SwarmingApi>,
    pub isolates: Arc<dyn IsolateApi>,
    pub isolate_cache: Arc<dyn IsolateCache>,
    pub pending_builds: Arc<dyn PendingBuilds>,
    pub issue_tracker: Arc<dyn IssueTracker>,
    pub repositories: Arc<Repositories>,
    /// Base URL used to build job links in responses and bug comments.
    pub base_url: String,
}

impl EngineDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        task_queue: Arc<dyn TaskQueue>,
        revisions: Arc<dyn RevisionApi>,
        builds: Arc<dyn BuildApi>,
        swarming: Arc<dyn SwarmingApi>,
        isolates: Arc<dyn IsolateApi>,
        isolate_cache: Arc<dyn IsolateCache>,
        pending_builds: Arc<dyn PendingBuilds>,
        issue_tracker: Arc<dyn IssueTracker>,
        repositories: Arc<Repositories>,
        base_url: String,
    ) -> Self {
        Self {
            store,
            task_queue,
            revisions,
            builds,
            swarming,
            isolates,
            isolate_cache,
            pending_builds,
            issue_tracker,
            repositories,
            base_url,
        }
    }
}
