//! REST API v1 endpoints
//!
//! ## API Structure
//!
//! ```text
//! /api/wfx/v1/
//! ├── workflows                   GET (list), POST
//! ├── workflows/{name}            GET, DELETE
//! ├── jobs                        GET (query), POST
//! ├── jobs/events                 GET     Server-sent event stream
//! ├── jobs/{id}                   GET, DELETE
//! ├── jobs/{id}/status            GET, PUT
//! ├── jobs/{id}/definition        GET, PUT
//! └── jobs/{id}/tags              GET, POST, DELETE
//! ```
//!
//! The southbound router exposes the read endpoints, status updates and the
//! event stream only.

pub mod definition;
pub mod events;
pub mod jobs;
pub mod status;
pub mod tags;
pub mod workflows;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use wfxrs_core::{Error, SortOrder};

use crate::state::AppState;

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub errors: Vec<ApiErrorDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetails {
    pub code: String,
    pub message: String,
}

/// Handler error type
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ApiErrorDetails {
                code: code.to_string(),
                message: message.into(),
            }],
        }
    }

    /// Map a domain error to its HTTP status and body
    pub fn from_error(err: Error) -> (StatusCode, Json<Self>) {
        let status = match &err {
            Error::Validation(_) | Error::IllegalTransition { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Storage(_) | Error::Config(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!(error = %err, "Request failed");
        } else {
            debug!(error = %err, code = err.code(), "Request rejected");
        }

        (status, Json(Self::new(err.code(), err.to_string())))
    }

    pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        Self::from_error(Error::Validation(message.into()))
    }

    pub fn from_json_rejection(rejection: JsonRejection) -> (StatusCode, Json<Self>) {
        Self::bad_request(rejection.body_text())
    }

    pub fn from_query_rejection(rejection: QueryRejection) -> (StatusCode, Json<Self>) {
        Self::bad_request(rejection.body_text())
    }
}

/// Paging parameters for list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub sort: SortOrder,
}

/// All endpoints, served to the management side
pub fn northbound() -> Router<AppState> {
    Router::new()
        .nest("/workflows", workflows::routes())
        .nest("/jobs", jobs::routes())
}

/// Client subset
pub fn southbound() -> Router<AppState> {
    Router::new()
        .nest("/workflows", workflows::read_routes())
        .nest("/jobs", jobs::client_routes())
}
