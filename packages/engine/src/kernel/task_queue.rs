//! Deferred task queue with named-task deduplication.
//!
//! The queue is the only cross-process coordinator: each job tick is a named
//! task with a countdown, delivered at least once. Task names are fresh
//! UUIDs chosen by the scheduler; rejecting duplicate names prevents
//! concurrent ticks of the same job without a distributed lock.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Redelivery stops after this many failed attempts for one task.
const MAX_DELIVERY_ATTEMPTS: i32 = 5;

/// A deferred task: deliver a POST to `url` after `countdown_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task name; the queue rejects duplicates.
    pub name: String,
    /// Delivery target, e.g. `/api/run/<job_id>`.
    pub url: String,
    pub countdown_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Created,
    /// A task with this name already exists; nothing was enqueued.
    Duplicate,
}

/// A task claimed for delivery.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub name: String,
    pub url: String,
    pub attempt: i32,
}

#[derive(Debug, Error)]
pub enum TaskQueueError {
    /// The enqueue did not finish in time. Callers retry once; repeated
    /// failures propagate.
    #[error("deadline exceeded while enqueuing task")]
    DeadlineExceeded,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a named task. Duplicate names are rejected, not errors.
    async fn add(&self, task: &TaskSpec) -> Result<EnqueueResult, TaskQueueError>;

    /// Claim up to `limit` due tasks for delivery.
    async fn claim_due(&self, limit: i64) -> Result<Vec<ClaimedTask>>;

    /// Acknowledge a delivered task.
    async fn mark_done(&self, name: &str) -> Result<()>;

    /// Record a failed delivery; the task becomes due again unless its
    /// attempts are exhausted.
    async fn mark_failed(&self, name: &str) -> Result<()>;
}

/// PostgreSQL-backed task queue.
///
/// Named-task deduplication is the primary-key constraint on `name`;
/// claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
/// deliver the same task twice at once.
pub struct PostgresTaskQueue {
    pool: sqlx::PgPool,
}

impl PostgresTaskQueue {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn add(&self, task: &TaskSpec) -> Result<EnqueueResult, TaskQueueError> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (name, url, run_at, status, attempt)
            VALUES ($1, $2, NOW() + ($3 || ' seconds')::INTERVAL, 'pending', 0)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&task.name)
        .bind(&task.url)
        .bind(task.countdown_secs.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| TaskQueueError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            Ok(EnqueueResult::Duplicate)
        } else {
            Ok(EnqueueResult::Created)
        }
    }

    async fn claim_due(&self, limit: i64) -> Result<Vec<ClaimedTask>> {
        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            r#"
            WITH due AS (
                SELECT name
                FROM tasks
                WHERE status = 'pending' AND run_at <= NOW()
                ORDER BY run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET status = 'running', attempt = attempt + 1
            WHERE name IN (SELECT name FROM due)
            RETURNING name, url, attempt
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, url, attempt)| ClaimedTask { name, url, attempt })
            .collect())
    }

    async fn mark_done(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = CASE WHEN attempt >= $2 THEN 'dead' ELSE 'pending' END,
                run_at = NOW() + INTERVAL '10 seconds'
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(MAX_DELIVERY_ATTEMPTS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
