//! Job status endpoints
//!
//! The acting side is taken from the router that served the request, never
//! from the request itself.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Extension, Json,
};
use tracing::instrument;
use wfxrs_core::{Eligible, StatusUpdate};

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// Get the current status of a job
#[instrument(skip(state))]
pub(super) async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = state
        .jobs
        .get_status(&id)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(status))
}

/// Request a status change
#[instrument(skip(state, payload))]
pub(super) async fn update_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Eligible>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(update) = payload.map_err(ApiError::from_json_rejection)?;

    let status = state
        .jobs
        .update_status(&id, update, actor)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(status))
}
