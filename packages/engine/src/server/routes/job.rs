//! Job status endpoint.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use crate::job::JobId;
use crate::server::routes::ApiError;
use crate::server::AppState;

pub async fn job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = JobId::from_str(&job_id).map_err(|_| ApiError::NotFound)?;
    let Some(job) = state.deps.store.get(id).await? else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(job.as_dict(&state.deps.base_url, true)))
}
