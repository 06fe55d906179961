//! Job definition endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value as JsonValue;
use tracing::instrument;

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// Get the job definition; `null` when the job has none
#[instrument(skip(state))]
pub(super) async fn get_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let definition = state
        .jobs
        .get_definition(&id)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(definition))
}

/// Replace the job definition
#[instrument(skip(state, payload))]
pub(super) async fn update_definition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(definition) = payload.map_err(ApiError::from_json_rejection)?;

    let definition = state
        .jobs
        .update_definition(&id, definition)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(definition))
}
