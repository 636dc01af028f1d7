//! Commit range endpoint.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::model::{Change, Commit, NonLinearError};
use crate::server::routes::ApiError;
use crate::server::AppState;
use crate::services::gitiles::CommitInfo;

#[derive(Deserialize)]
pub struct CommitsRequest {
    #[serde(default = "default_repository")]
    pub repository: String,
    pub start_git_hash: String,
    pub end_git_hash: String,
}

fn default_repository() -> String {
    "chromium".to_string()
}

pub async fn commits_handler(
    State(state): State<AppState>,
    Json(request): Json<CommitsRequest>,
) -> Result<Json<Vec<CommitInfo>>, ApiError> {
    let deps = &state.deps;
    let start = Commit::from_fields(&request.repository, &request.start_git_hash, &deps.repositories)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let end = Commit::from_fields(&request.repository, &request.end_git_hash, &deps.repositories)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let range = Change::commit_range(&start, &end, &*deps.revisions, &deps.repositories)
        .await
        .map_err(|err| match err.downcast_ref::<NonLinearError>() {
            Some(non_linear) => ApiError::BadRequest(non_linear.to_string()),
            None => ApiError::Internal(err),
        })?;
    Ok(Json(range))
}
