//! JSON error bodies for every non-2xx answer.
//!
//! Handlers return [`AppError`]; extractor failures go through
//! [`json_error_response`]. Both produce the same [`ErrorResponse`] shape so a
//! client can always read `error`, `message` and `request_id`.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::logging::REQUEST_ID_HEADER;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    /// Echo of `x-request-id` so support can find the log lines
    pub request_id: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    fn build(error: ErrorCode, message: String, request_id: Option<String>, retryable: bool) -> Self {
        Self {
            error,
            message,
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(retryable),
        }
    }

    pub fn from_app_error(error: &AppError) -> Self {
        let mut body = Self::build(
            error.error_code(),
            error.user_message(),
            error.request_id.clone(),
            error.is_retryable(),
        );
        if let Some(context) = &error.context {
            body.details = Some(serde_json::json!({ "context": context }));
        }
        body
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self::build(
            ErrorCode::InternalError,
            "Something went wrong on our side. Please try again later".to_string(),
            request_id,
            false,
        )
    }

    /// Rejected request body; `reason` lands in `details`
    pub fn invalid_request(request_id: Option<String>, reason: &str) -> Self {
        let mut body = Self::build(
            ErrorCode::ValidationError,
            "The request body could not be accepted".to_string(),
            request_id,
            false,
        );
        body.details = Some(serde_json::json!({ "reason": reason }));
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = status.as_u16();

        if status.is_server_error() {
            tracing::error!(error = ?self.kind, request_id = ?self.request_id, status = code, "request failed");
        } else {
            tracing::warn!(error = ?self.kind, request_id = ?self.request_id, status = code, "request rejected");
        }

        (status, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Error body for failures that happen before a handler has an [`AppError`].
pub fn json_error_response(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let body = if status.is_client_error() {
        ErrorResponse::invalid_request(request_id, &message.into())
    } else {
        ErrorResponse::internal_error(request_id)
    };
    (status, Json(body))
}
