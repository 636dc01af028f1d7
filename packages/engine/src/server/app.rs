//! Router and shared handler state.

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::kernel::EngineDeps;
use crate::server::routes;

#[derive(Clone)]
pub struct AppState {
    pub deps: EngineDeps,
    /// Present when the server fronts a real database; `/health` checks it.
    pub db_pool: Option<PgPool>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_handler))
        .route("/api/new", post(routes::new::new_handler))
        .route("/api/run/:job_id", post(routes::run::run_handler))
        .route("/api/job/:job_id", get(routes::job::job_handler))
        .route("/api/commits", post(routes::commits::commits_handler))
        .route("/api/isolate", post(routes::isolate::isolate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
