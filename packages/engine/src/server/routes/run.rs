//! Task-queue callback: run one tick of a job.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::job::{JobId, JobStatus};
use crate::server::routes::ApiError;
use crate::server::AppState;

pub async fn run_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = JobId::from_str(&job_id).map_err(|_| ApiError::NotFound)?;
    let Some(mut job) = state.deps.store.get(id).await? else {
        return Err(ApiError::NotFound);
    };

    // Re-delivered ticks for terminal jobs are no-ops; see the runner.
    if job.status() != JobStatus::Running {
        return Ok(Json(json!({ "status": job.status() })));
    }

    job.run(&state.deps).await?;
    Ok(Json(json!({ "status": job.status() })))
}
