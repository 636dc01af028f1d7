//! Builder callback: register uploaded isolates in the shared cache.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::kernel::IsolateRef;
use crate::model::Change;
use crate::server::routes::ApiError;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct IsolateUpload {
    pub builder: String,
    pub change: Value,
    pub target: String,
    pub isolate_server: String,
    pub isolate_hash: String,
}

pub async fn isolate_handler(
    State(state): State<AppState>,
    Json(upload): Json<IsolateUpload>,
) -> Result<Json<Value>, ApiError> {
    let deps = &state.deps;
    let change = Change::from_dict(&upload.change, &deps.repositories)
        .map_err(|err| ApiError::BadRequest(format!("{err:#}")))?;

    deps.isolate_cache
        .put(
            &upload.builder,
            &change.id_string(),
            &upload.target,
            &IsolateRef {
                isolate_server: upload.isolate_server,
                isolate_hash: upload.isolate_hash,
            },
        )
        .await?;

    Ok(Json(json!({ "status": "ok" })))
}
