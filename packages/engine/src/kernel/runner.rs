//! Background service that delivers due job ticks.
//!
//! The runner claims due tasks from the queue, loads each task's job, runs
//! one tick, and acknowledges or fails the delivery. A failed delivery goes
//! back on the queue, which is what makes tick delivery at-least-once; the
//! job side stays correct under redelivery because every remote dispatch is
//! guarded by recorded state.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::job::{JobId, JobStatus};
use crate::kernel::task_queue::ClaimedTask;
use crate::kernel::EngineDeps;

/// Configuration for the tick runner.
#[derive(Debug, Clone)]
pub struct TickRunnerConfig {
    /// Maximum number of tasks to claim at once.
    pub batch_size: i64,
    /// How long to wait when no tasks are due.
    pub poll_interval: Duration,
    /// Worker ID for this instance.
    pub worker_id: String,
}

impl Default for TickRunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            worker_id: format!("runner-{}", Uuid::new_v4()),
        }
    }
}

/// Background service that processes job ticks from the queue.
pub struct TickRunner {
    deps: EngineDeps,
    config: TickRunnerConfig,
    shutdown: Arc<AtomicBool>,
}

impl TickRunner {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            config: TickRunnerConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(deps: EngineDeps, config: TickRunnerConfig) -> Self {
        Self {
            deps,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a shutdown handle; store `true` to stop the runner gracefully.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "tick runner starting"
        );

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let tasks = match self.deps.task_queue.claim_due(self.config.batch_size).await {
                Ok(tasks) => tasks,
                Err(err) => {
                    error!(error = %err, "failed to claim tasks");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if tasks.is_empty() {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(count = tasks.len(), "claimed tasks");
            for task in tasks {
                self.deliver(task).await;
            }
        }

        info!(worker_id = %self.config.worker_id, "tick runner stopped");
        Ok(())
    }

    /// Deliver one tick. Tasks that can never succeed (bad payloads,
    /// vanished or terminal jobs) are acknowledged and dropped.
    async fn deliver(&self, task: ClaimedTask) {
        let outcome = self.run_tick(&task).await;
        match outcome {
            Ok(()) => {
                if let Err(err) = self.deps.task_queue.mark_done(&task.name).await {
                    error!(task = %task.name, error = %err, "failed to acknowledge task");
                }
            }
            Err(err) => {
                warn!(task = %task.name, attempt = task.attempt, error = %format!("{err:#}"), "tick failed");
                if let Err(err) = self.deps.task_queue.mark_failed(&task.name).await {
                    error!(task = %task.name, error = %err, "failed to record task failure");
                }
            }
        }
    }

    async fn run_tick(&self, task: &ClaimedTask) -> Result<()> {
        let Some(job_id) = job_id_from_url(&task.url) else {
            warn!(task = %task.name, url = %task.url, "dropping task with unparseable url");
            return Ok(());
        };

        let Some(mut job) = self.deps.store.get(job_id).await? else {
            warn!(task = %task.name, job_id = %job_id, "dropping task for unknown job");
            return Ok(());
        };

        // A job only leaves Running through complete or fail; a tick for a
        // terminal job is a stale redelivery (or an out-of-band cancel) and
        // must not restart it.
        if job.status() != JobStatus::Running {
            debug!(job_id = %job_id, "skipping tick for terminal job");
            return Ok(());
        }

        job.run(&self.deps).await
    }
}

fn job_id_from_url(url: &str) -> Option<JobId> {
    let id = url.strip_prefix("/api/run/")?;
    JobId::from_str(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = TickRunnerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert!(config.worker_id.starts_with("runner-"));
    }

    #[test]
    fn job_id_parses_from_run_url() {
        let id = job_id_from_url("/api/run/1a2b3c").unwrap();
        assert_eq!(id.to_string(), "1a2b3c");
    }

    #[test]
    fn other_urls_do_not_parse() {
        assert!(job_id_from_url("/api/job/1a2b3c").is_none());
        assert!(job_id_from_url("/api/run/not-hex").is_none());
    }
}
