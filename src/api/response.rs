use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::FlowError;

pub const INVALID_INPUT: &str = "Invalid input";
pub const NAME_TAKEN: &str = "Username already exists";
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const INVALID_TOKEN: &str = "Invalid token";
pub const SERVER_ERROR: &str = "Server error";

// ============================================================================
// Response envelope
// ============================================================================

/// `{"success": bool, "data": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub success: bool,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Json<Envelope<T>> {
        Json(Envelope {
            data,
            success: true,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorData {
    pub error: String,
}

// ============================================================================
// Unified error type for handlers
// ============================================================================

/// A handler error. `Fail` is the client's fault (4xx), `Error` is ours
/// (5xx); both render as `{"success": false, "data": {"error": ...}}`.
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Fail(code, msg) => (code, msg),
            ApiError::Error(code, msg) => (code, msg),
        };
        let body = Envelope {
            data: ErrorData { error: message },
            success: false,
        };
        (status, Json(body)).into_response()
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::UNAUTHORIZED, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::InvalidInput(reason) => {
                tracing::debug!(reason, "Rejected invalid input");
                ApiError::bad_request(INVALID_INPUT)
            }
            FlowError::NameTaken => ApiError::bad_request(NAME_TAKEN),
            FlowError::InvalidCredentials => ApiError::bad_request(INVALID_CREDENTIALS),
            FlowError::Unavailable(detail) => {
                tracing::error!(error = %detail, "Request failed on infrastructure");
                ApiError::internal(SERVER_ERROR)
            }
        }
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// `Json` extractor whose rejection is rendered in the response envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Rejected request body");
        ApiError::bad_request(INVALID_INPUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_flow_errors_map_to_wire_messages() {
        let cases = [
            (FlowError::InvalidInput("x"), StatusCode::BAD_REQUEST, INVALID_INPUT),
            (FlowError::NameTaken, StatusCode::BAD_REQUEST, NAME_TAKEN),
            (FlowError::InvalidCredentials, StatusCode::BAD_REQUEST, INVALID_CREDENTIALS),
            (
                FlowError::Unavailable("queue down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
                SERVER_ERROR,
            ),
        ];

        for (error, status, message) in cases {
            match ApiError::from(error) {
                ApiError::Fail(code, msg) | ApiError::Error(code, msg) => {
                    assert_eq!(code, status);
                    assert_eq!(msg, message);
                }
            }
        }
    }

    #[test]
    fn test_error_response_status() {
        let response = ApiError::internal(SERVER_ERROR).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
