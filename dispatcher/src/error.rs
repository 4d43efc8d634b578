//! HTTP error responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::validator::ValidationError;

/// Errors a dispatcher handler can answer with.
///
/// Every variant renders as `{ "error": <code>, "message": <text> }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("request body is not valid JSON: {0}")]
    MalformedPayload(String),

    #[error("webhook signature missing or invalid")]
    InvalidSignature,

    #[error("too many builds in flight, retry later")]
    Overloaded { retry_after_secs: u64 },

    #[error("job not found")]
    NotFound,

    #[error("invalid job id")]
    InvalidJobId,
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedPayload(_) | AppError::InvalidJobId => {
                StatusCode::BAD_REQUEST
            }
            AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Overloaded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(err) => err.code(),
            AppError::MalformedPayload(_) => "malformed_payload",
            AppError::InvalidSignature => "invalid_signature",
            AppError::Overloaded { .. } => "overloaded",
            AppError::NotFound => "not_found",
            AppError::InvalidJobId => "invalid_job_id",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let AppError::Validation(err) = &self {
            if let Some(field) = err.field() {
                body["field"] = json!(field);
            }
        }

        let mut response = (self.status(), axum::Json(body)).into_response();
        if let AppError::Overloaded { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
