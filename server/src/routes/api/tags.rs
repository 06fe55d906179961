//! Job tag endpoints
//!
//! Request bodies are JSON arrays of tag names; every endpoint answers with
//! the resulting sorted tag set.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use tracing::{info, instrument};
use wfxrs_core::TagOp;

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// Get the tags of a job
#[instrument(skip(state))]
pub(super) async fn get_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let tags = state
        .jobs
        .get_tags(&id)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(tags))
}

/// Add tags to a job
#[instrument(skip(state, payload))]
pub(super) async fn add_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    update(state, id, TagOp::Add, payload).await
}

/// Remove tags from a job
#[instrument(skip(state, payload))]
pub(super) async fn delete_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    update(state, id, TagOp::Remove, payload).await
}

async fn update(
    state: AppState,
    id: String,
    op: TagOp,
    payload: Result<Json<Vec<String>>, JsonRejection>,
) -> ApiResult<Json<Vec<String>>> {
    let Json(tags) = payload.map_err(ApiError::from_json_rejection)?;
    info!(id = %id, ?op, count = tags.len(), "Updating job tags");

    let tags = state
        .jobs
        .update_tags(&id, op, tags)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(tags))
}
