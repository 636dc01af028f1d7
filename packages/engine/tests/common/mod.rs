//! Shared test harness: fixtures and a tick driver over the fakes.
#![allow(dead_code)]

use std::str::FromStr;

use bisect_engine::job::{Job, JobId, JobStatus};
use bisect_engine::kernel::test_dependencies::TestDeps;
use bisect_engine::kernel::{EngineDeps, TaskQueue};
use bisect_engine::model::{Change, Commit, Patch};
use bisect_engine::quest::ResultArguments;
use serde_json::json;

pub const BUILDER: &str = "Mac Builder";
pub const TARGET: &str = "telemetry_perf_tests";
pub const ISOLATE_SERVER: &str = "https://isolate.server";

pub fn change(git_hash: &str) -> Change {
    Change::new(vec![Commit::new("chromium", git_hash)], None).unwrap()
}

pub fn patched_change(git_hash: &str) -> Change {
    Change::new(
        vec![Commit::new("chromium", git_hash)],
        Some(Patch::new("https://example.org", 672011, "2f0d")),
    )
    .unwrap()
}

pub fn isolate_arguments(isolate_hash: &str) -> ResultArguments {
    ResultArguments::from([
        ("isolate_server".to_string(), ISOLATE_SERVER.to_string()),
        ("isolate_hash".to_string(), isolate_hash.to_string()),
    ])
}

/// Seed the artifact store with a graph-json output readable under
/// `isolate_hash`: a manifest plus a data file with one value.
pub fn seed_graph_json(test_deps: &TestDeps, isolate_hash: &str, chart: &str, trace: &str, value: f64) {
    let data_digest = format!("{}-data", isolate_hash);
    test_deps.isolates.put_json(
        isolate_hash,
        json!({"files": {"chartjson-output.json": {"h": data_digest}}}),
    );
    test_deps.isolates.put_json(
        &data_digest,
        json!({chart: {"traces": {trace: [value.to_string(), "0.0"]}}}),
    );
}

/// Deliver queued ticks until the queue drains, panicking if any tick
/// errors or the job never settles.
pub async fn drive_to_completion(test_deps: &TestDeps, deps: &EngineDeps, max_ticks: usize) {
    for _ in 0..max_ticks {
        let tasks = test_deps.task_queue.claim_due(10).await.unwrap();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            let mut job = load_job(deps, &task.url).await;
            if job.status() == JobStatus::Running {
                job.run(deps).await.expect("tick failed");
            }
            test_deps.task_queue.mark_done(&task.name).await.unwrap();
        }
    }
    panic!("job did not settle within {} ticks", max_ticks);
}

pub async fn load_job(deps: &EngineDeps, task_url: &str) -> Job {
    let id = job_id_from_task_url(task_url);
    deps.store.get(id).await.unwrap().expect("job not found")
}

pub fn job_id_from_task_url(task_url: &str) -> JobId {
    let id = task_url.strip_prefix("/api/run/").expect("not a run url");
    JobId::from_str(id).unwrap()
}
