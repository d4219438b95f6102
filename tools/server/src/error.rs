//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use notevault_common::{Conflict, Error};

/// Errors returned by HTTP handlers.
///
/// Kept apart from the core error: `NotFound` here also covers unknown
/// routes and resources the HTTP layer itself looks up.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    NotFound(String),
    Forbidden(String),
    Conflict(Box<Conflict>),
    BadRequest(String),
    TooManyConnections(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::Forbidden(e) => write!(f, "Forbidden: {}", e),
            Self::Conflict(c) => write!(f, "Version conflict on note {}", c.note_id),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::TooManyConnections(e) => write!(f, "Too many connections: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(msg) => Self::NotFound(msg),
            Error::AccessDenied(msg) => Self::Forbidden(msg),
            Error::VersionConflict(conflict) => Self::Conflict(conflict),
            Error::InvalidResolution(msg) | Error::InvalidInput(msg) => Self::BadRequest(msg),
            e @ Error::CapacityRejected { .. } => Self::TooManyConnections(e.to_string()),
            e @ (Error::Storage(_) | Error::Serialization(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized(e) => (StatusCode::UNAUTHORIZED, json!({ "error": e })),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, json!({ "error": e })),
            Self::Forbidden(e) => (StatusCode::FORBIDDEN, json!({ "error": e })),
            Self::Conflict(conflict) => (
                StatusCode::CONFLICT,
                json!({ "error": "version conflict", "conflict": conflict }),
            ),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, json!({ "error": e })),
            Self::TooManyConnections(e) => (StatusCode::TOO_MANY_REQUESTS, json!({ "error": e })),
            Self::Internal(e) => {
                tracing::error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
