//! Workflow API endpoints

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use wfxrs_core::Workflow;

use super::{ApiError, ApiResult, ListParams};
use crate::state::AppState;

/// Create workflows router
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/{name}", get(get_workflow).delete(delete_workflow))
}

/// Read-only workflows router
pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows))
        .route("/{name}", get(get_workflow))
}

/// List workflows
#[instrument(skip(state, params))]
async fn list_workflows(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params.map_err(ApiError::from_query_rejection)?;

    let page = state
        .workflows
        .query(params.offset, params.limit, params.sort)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(page))
}

/// Get workflow by name
#[instrument(skip(state))]
async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let workflow = state
        .workflows
        .get(&name)
        .await
        .map_err(ApiError::from_error)?;

    Ok(Json(workflow))
}

/// Create a new workflow
#[instrument(skip(state, payload))]
async fn create_workflow(
    State(state): State<AppState>,
    payload: Result<Json<Workflow>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(workflow) = payload.map_err(ApiError::from_json_rejection)?;
    info!(name = %workflow.name, "Creating workflow");

    let workflow = state
        .workflows
        .create(workflow)
        .await
        .map_err(ApiError::from_error)?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

/// Delete a workflow that no job references
#[instrument(skip(state))]
async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    info!(name = %name, "Deleting workflow");

    state
        .workflows
        .delete(&name)
        .await
        .map_err(ApiError::from_error)?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wfxrs_database::Database;

    async fn app() -> Router {
        let db = Database::new_in_memory().await.unwrap();
        routes().with_state(AppState::new(Config::default(), db))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn workflow(name: &str) -> Value {
        json!({
            "name": name,
            "states": [{"name": "OPEN"}, {"name": "CLOSED"}],
            "transitions": [{"from": "OPEN", "to": "CLOSED", "eligible": "CLIENT"}]
        })
    }

    #[tokio::test]
    async fn test_create_get_list_delete() {
        let app = app().await;

        let (status, body) = call(&app, post(workflow("wf.one"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "wf.one");

        let (status, body) = call(&app, post(workflow("wf.one"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "wfx.conflict");

        call(&app, post(workflow("wf.two"))).await;

        let (status, body) = call(&app, get_req("/?limit=1&sort=desc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["pagination"]["limit"], 1);
        assert_eq!(body["content"][0]["name"], "wf.two");

        let (status, body) = call(&app, get_req("/wf.one")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transitions"][0]["eligible"], "CLIENT");
        assert_eq!(body["transitions"][0]["action"], "WAIT");

        let request = Request::builder()
            .method("DELETE")
            .uri("/wf.one")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, get_req("/wf.one")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "wfx.notFound");
    }

    #[tokio::test]
    async fn test_rejects_malformed_input() {
        let app = app().await;

        let (status, body) = call(&app, post(json!({"name": "bad name!", "states": [{"name": "A"}]}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "wfx.validationError");

        let (status, body) = call(&app, post(json!({"states": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "wfx.validationError");

        // an immediate edge must be the only way out of its source state
        let (status, body) = call(
            &app,
            post(json!({
                "name": "ambiguous",
                "states": [{"name": "A"}, {"name": "B"}, {"name": "C"}],
                "transitions": [
                    {"from": "A", "to": "B", "eligible": "WFX", "action": "IMMEDIATE"},
                    {"from": "A", "to": "C", "eligible": "CLIENT"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "wfx.validationError");

        let (status, _) = call(&app, get_req("/?offset=-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, get_req("/?sort=sideways")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
