//! Common types for facade responses and errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API error response body
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        ApiError {
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str) -> (StatusCode, Json<ApiError>) {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("{} not found", resource))),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
        (StatusCode::BAD_REQUEST, Json(ApiError::new(message)))
    }

    pub fn bad_gateway(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
        (StatusCode::BAD_GATEWAY, Json(ApiError::new(message)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Result type for facade handlers
pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error() {
        let err = ApiError::new("test error");
        assert_eq!(err.message, "test error");
    }

    #[test]
    fn test_not_found_shape() {
        let (status, body) = ApiError::not_found("group");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0.message, "group not found");
    }
}
