use crate::error::EntityError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Seconds a client should wait before retrying an unavailable entity
const RETRY_AFTER_SECS: &str = "5";

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types
#[derive(Debug)]
pub enum ApiError {
    ValidationError(String),
    InvalidSchedule(String),
    Unavailable(String),
    Internal(String),
}

impl From<EntityError> for ApiError {
    fn from(e: EntityError) -> Self {
        match e {
            EntityError::InvalidSchedule { .. } => ApiError::InvalidSchedule(e.to_string()),
            EntityError::InvalidValue { .. } => ApiError::ValidationError(e.to_string()),
            EntityError::Unavailable { .. } => ApiError::Unavailable(e.to_string()),
            EntityError::Persistence(_)
            | EntityError::StateCodec { .. }
            | EntityError::UnexpectedReply { .. } => {
                error!(error = %e, "Entity operation failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unavailable(msg) => {
                let body = Json(ErrorResponse { error: msg });
                let mut resp = (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
                resp.headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
                resp
            }
            other => {
                let (status, error_message) = match other {
                    ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
                    ApiError::InvalidSchedule(msg) => (StatusCode::BAD_REQUEST, msg),
                    ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
                    ApiError::Unavailable(_) => unreachable!(),
                };
                let body = Json(ErrorResponse {
                    error: error_message,
                });
                (status, body).into_response()
            }
        }
    }
}

/// Parse a building ID path segment.
pub(crate) fn parse_building_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::ValidationError(format!("invalid building id '{}'", raw)))
}
