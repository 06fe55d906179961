//! Job API endpoints
//!
//! Also assembles the per-job sub-resources (status, definition, tags) and
//! the event stream.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument};
use wfxrs_core::{Error, JobFilter, JobRequest, SortOrder};

use super::{definition, events, status, tags, ApiError, ApiResult};
use crate::state::AppState;

/// Create jobs router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(query_jobs).post(create_job))
        .route("/events", get(events::subscribe))
        .route("/{id}", get(get_job).delete(delete_job))
        .route(
            "/{id}/status",
            get(status::get_status).put(status::update_status),
        )
        .route(
            "/{id}/definition",
            get(definition::get_definition).put(definition::update_definition),
        )
        .route(
            "/{id}/tags",
            get(tags::get_tags)
                .post(tags::add_tags)
                .delete(tags::delete_tags),
        )
}

/// Jobs router for clients
pub fn client_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(query_jobs))
        .route("/events", get(events::subscribe))
        .route("/{id}", get(get_job))
        .route(
            "/{id}/status",
            get(status::get_status).put(status::update_status),
        )
        .route("/{id}/definition", get(definition::get_definition))
        .route("/{id}/tags", get(tags::get_tags))
}

/// Job query parameters.
///
/// `tag` and `group` may be repeated or comma separated.
#[derive(Debug, Default)]
struct JobQuery {
    filter: JobFilter,
    sort: SortOrder,
    offset: Option<i64>,
    limit: Option<i64>,
}

impl JobQuery {
    fn from_pairs(pairs: Vec<(String, String)>) -> wfxrs_core::Result<Self> {
        let mut query = Self::default();

        for (key, value) in pairs {
            match key.as_str() {
                "clientId" => query.filter.client_id = Some(value),
                "state" => query.filter.state = Some(value),
                "workflow" => query.filter.workflow = Some(value),
                "tag" => query.filter.tags.extend(split_list(&value)),
                "group" => query.filter.groups.extend(split_list(&value)),
                "offset" => query.offset = Some(parse_number(&key, &value)?),
                "limit" => query.limit = Some(parse_number(&key, &value)?),
                "sort" => {
                    query.sort = match value.as_str() {
                        "asc" => SortOrder::Asc,
                        "desc" => SortOrder::Desc,
                        other => {
                            return Err(Error::Validation(format!(
                                "invalid sort order '{}' (expected asc or desc)",
                                other
                            )))
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(query)
    }
}

/// Split a comma separated list, dropping blanks
pub(super) fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_number(key: &str, value: &str) -> wfxrs_core::Result<i64> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("invalid {} '{}'", key, value)))
}

/// Query jobs
#[instrument(skip(state, params))]
async fn query_jobs(
    State(state): State<AppState>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(pairs) = params.map_err(ApiError::from_query_rejection)?;
    let query = JobQuery::from_pairs(pairs).map_err(ApiError::from_error)?;

    let page = state
        .jobs
        .query(&query.filter, query.sort, query.offset, query.limit)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(page))
}

/// Create a new job
#[instrument(skip(state, payload))]
async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(ApiError::from_json_rejection)?;
    info!(client_id = %request.client_id, workflow = %request.workflow, "Creating job");

    let job = state
        .jobs
        .create(request)
        .await
        .map_err(ApiError::from_error)?;

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
struct GetJobParams {
    #[serde(default)]
    history: bool,
}

/// Get job by ID
#[instrument(skip(state, params))]
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<GetJobParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params.map_err(ApiError::from_query_rejection)?;

    let job = state
        .jobs
        .get(&id, params.history)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(job))
}

/// Delete a job
#[instrument(skip(state))]
async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    info!(id = %id, "Deleting job");

    state.jobs.delete(&id).await.map_err(ApiError::from_error)?;

    Ok(StatusCode::NO_CONTENT)
}
