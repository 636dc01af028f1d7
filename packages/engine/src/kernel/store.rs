//! Job persistence: a single-entity key-value store.
//!
//! Jobs are persisted under `Job:<id>` as one versioned JSON blob. The
//! embedded state is not queryable on sub-fields, and doesn't need to be:
//! each job is a single entity with strong read-after-write consistency,
//! which is the only guarantee the scheduler relies on.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::job::{Job, JobId, STATE_VERSION};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: JobId) -> Result<Option<Job>>;
}

/// Encode a job into its persisted form.
pub fn encode_job(job: &Job) -> Result<serde_json::Value> {
    serde_json::to_value(job).context("failed to encode job")
}

/// Decode a persisted job, rejecting encodings this build doesn't know.
/// A versioned encoding means a deploy skew loudly refuses instead of
/// silently dropping fields.
pub fn decode_job(value: serde_json::Value) -> Result<Job> {
    let version = value.get("version").and_then(serde_json::Value::as_u64);
    if version != Some(u64::from(STATE_VERSION)) {
        bail!(
            "unsupported job encoding version {:?} (expected {})",
            version,
            STATE_VERSION
        );
    }
    serde_json::from_value(value).context("failed to decode job")
}

/// PostgreSQL-backed job store.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let value = encode_job(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(job.id.key())
        .bind(&value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT value FROM jobs WHERE key = $1")
                .bind(id.key())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(value,)| decode_job(value)).transpose()
    }
}
