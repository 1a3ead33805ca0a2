//! HTTP rendering of core errors.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chatsuite_core::Error;
use chatsuite_core::config::Environment;
use serde_json::{Value, json};

/// A fully rendered error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": code, "message": message.into() }),
        }
    }

    /// Map a core error to its status code and body.
    ///
    /// Internal failures only carry `details` outside production.
    pub fn from_error(error: &Error, environment: Environment) -> Self {
        let status = match error {
            Error::Validation(_) | Error::NoValidMessages => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status != StatusCode::INTERNAL_SERVER_ERROR {
            return Self::new(status, error.code(), error.to_string());
        }

        tracing::error!(code = error.code(), "Request failed: {error}");
        let mut body = json!({ "error": "An unexpected error occurred" });
        if !environment.is_production() {
            body["details"] = Value::String(error.to_string());
        }
        Self { status, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Attach the deployment environment when converting core results.
pub trait ApiResultExt<T> {
    fn or_api(self, environment: Environment) -> Result<T, ApiError>;
}

impl<T> ApiResultExt<T> for chatsuite_core::Result<T> {
    fn or_api(self, environment: Environment) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::from_error(&e, environment))
    }
}
