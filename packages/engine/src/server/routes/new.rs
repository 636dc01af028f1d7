//! Handler that cooks up a fresh bisection job.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::args::JobArguments;
use crate::job::Job;
use crate::quest::generate_quests;
use crate::server::routes::ApiError;
use crate::server::AppState;
use crate::state::{JobState, DEFAULT_REPEAT_COUNT};

#[derive(Serialize)]
pub struct NewJobResponse {
    pub job_id: String,
    pub job_url: String,
}

pub async fn new_handler(
    State(state): State<AppState>,
    Json(arguments): Json<JobArguments>,
) -> Result<Json<NewJobResponse>, ApiError> {
    let deps = &state.deps;

    // Validate everything before the job exists; a bad request must never
    // leave a half-configured job behind.
    let quests = generate_quests(&arguments)?;
    let changes = arguments.validate_changes(&deps.repositories)?;

    let mut job = Job::builder()
        .auto_explore(arguments.auto_explore)
        .state(JobState::new(quests, DEFAULT_REPEAT_COUNT))
        .arguments(arguments)
        .build();
    job.bug_id = job.arguments.bug_id;
    job.comparison_mode = job.arguments.comparison_mode;
    job.tags = job.arguments.tags.clone();
    job.user = job.arguments.user.clone();

    for change in changes {
        job.state.add_change(change, None);
    }

    job.start(deps).await.map_err(ApiError::Internal)?;

    tracing::info!(job_id = %job.id, "job created");
    Ok(Json(NewJobResponse {
        job_id: job.id.to_string(),
        job_url: job.url(&deps.base_url),
    }))
}
