//! Shared isolate cache and pending-build index.
//!
//! Both are process-external collaborators with put-if-absent semantics:
//! the first writer for a key wins and later writers are no-ops. The cache
//! maps (builder, change, target) to the isolate a finished build uploaded;
//! the pending-build index coalesces concurrent build requests for the same
//! key onto one build id.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A content-addressed build artifact: where it lives and its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolateRef {
    pub isolate_server: String,
    pub isolate_hash: String,
}

#[async_trait]
pub trait IsolateCache: Send + Sync {
    async fn get(&self, builder: &str, change_id: &str, target: &str)
        -> Result<Option<IsolateRef>>;

    /// Record an uploaded isolate. First writer wins.
    async fn put(
        &self,
        builder: &str,
        change_id: &str,
        target: &str,
        isolate: &IsolateRef,
    ) -> Result<()>;
}

#[async_trait]
pub trait PendingBuilds: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Record an in-flight build id for `key`, returning the winning id:
    /// the given one, or whatever an earlier writer stored.
    async fn put_if_absent(&self, key: &str, build_id: &str) -> Result<String>;

    /// Clear the entry once the build is terminal, so a failed build can't
    /// pin the key forever.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// PostgreSQL-backed isolate cache.
pub struct PostgresIsolateCache {
    pool: PgPool,
}

impl PostgresIsolateCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IsolateCache for PostgresIsolateCache {
    async fn get(
        &self,
        builder: &str,
        change_id: &str,
        target: &str,
    ) -> Result<Option<IsolateRef>> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT isolate_server, isolate_hash
            FROM isolates
            WHERE builder = $1 AND change_id = $2 AND target = $3
            "#,
        )
        .bind(builder)
        .bind(change_id)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(isolate_server, isolate_hash)| IsolateRef {
            isolate_server,
            isolate_hash,
        }))
    }

    async fn put(
        &self,
        builder: &str,
        change_id: &str,
        target: &str,
        isolate: &IsolateRef,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO isolates (builder, change_id, target, isolate_server, isolate_hash)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (builder, change_id, target) DO NOTHING
            "#,
        )
        .bind(builder)
        .bind(change_id)
        .bind(target)
        .bind(&isolate.isolate_server)
        .bind(&isolate.isolate_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// PostgreSQL-backed pending-build index.
pub struct PostgresPendingBuilds {
    pool: PgPool,
}

impl PostgresPendingBuilds {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingBuilds for PostgresPendingBuilds {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT build_id FROM pending_builds WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(build_id,)| build_id))
    }

    async fn put_if_absent(&self, key: &str, build_id: &str) -> Result<String> {
        sqlx::query(
            r#"
            INSERT INTO pending_builds (key, build_id)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(build_id)
        .execute(&self.pool)
        .await?;

        let (winner,): (String,) =
            sqlx::query_as("SELECT build_id FROM pending_builds WHERE key = $1")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(winner)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_builds WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
