//! HTTP routers
//!
//! The northbound router serves the management side and acts as `WFX`; the
//! southbound router serves job-performing clients and acts as `CLIENT`.
//! Both share the same state, so a change made on one side is immediately
//! visible on the other.

mod api;

use axum::{
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};
use wfxrs_core::Eligible;

use crate::state::AppState;
use api::ApiError;

/// Base path of the REST API
pub const BASE_PATH: &str = "/api/wfx/v1";

/// Management router, all endpoints
pub fn northbound_routes(state: AppState) -> Router {
    build(api::northbound(), Eligible::Wfx, state)
}

/// Client router, read access plus status updates
pub fn southbound_routes(state: AppState) -> Router {
    build(api::southbound(), Eligible::Client, state)
}

fn build(api: Router<AppState>, actor: Eligible, state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/version", get(version))
        .nest(BASE_PATH, api)
        .fallback(not_found)
        .layer(Extension(actor))
        .layer(
            TraceLayer::new_for_http().make_span_with(move |request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    %actor,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

/// Health check endpoint
///
/// Reports `ok` when the database answers.
#[instrument(skip(state))]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    debug!("Health check requested");
    match state.database.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "error": e.to_string() })),
        ),
    }
}

async fn version() -> impl IntoResponse {
    Json(json!({
        "service": "wfx",
        "version": env!("CARGO_PKG_VERSION"),
        "apiVersion": "v1"
    }))
}

async fn not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("wfx.notFound", "no such endpoint")),
    )
}
