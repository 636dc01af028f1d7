// Main entry point for the bisection service.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bisect_engine::config::Config;
use bisect_engine::kernel::isolate_cache::{PostgresIsolateCache, PostgresPendingBuilds};
use bisect_engine::kernel::store::PostgresJobStore;
use bisect_engine::kernel::task_queue::PostgresTaskQueue;
use bisect_engine::kernel::{EngineDeps, TickRunner};
use bisect_engine::model::Repositories;
use bisect_engine::server::{build_app, AppState};
use bisect_engine::services::buildbucket::BuildbucketClient;
use bisect_engine::services::gitiles::GitilesClient;
use bisect_engine::services::isolate::IsolateClient;
use bisect_engine::services::issue_tracker::IssueTrackerClient;
use bisect_engine::services::swarming::SwarmingClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bisect_engine=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting bisection service");

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let deps = EngineDeps::new(
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(PostgresTaskQueue::new(pool.clone())),
        Arc::new(GitilesClient::new()?),
        Arc::new(BuildbucketClient::new(config.buildbucket_url.clone())?),
        Arc::new(SwarmingClient::new(config.swarming_url.clone())?),
        Arc::new(IsolateClient::new()?),
        Arc::new(PostgresIsolateCache::new(pool.clone())),
        Arc::new(PostgresPendingBuilds::new(pool.clone())),
        Arc::new(IssueTrackerClient::new(config.issue_tracker_url.clone())?),
        Arc::new(Repositories::new(config.repositories.clone())),
        config.base_url.clone(),
    );

    let runner = TickRunner::new(deps.clone());
    let _runner = tokio::spawn(async move {
        if let Err(err) = runner.run().await {
            tracing::error!(error = %err, "tick runner exited");
        }
    });

    let app = build_app(AppState {
        deps,
        db_pool: Some(pool),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
