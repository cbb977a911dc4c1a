use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, DomainError};
use crate::middleware::error::get_request_id_from_headers;
use crate::services::webhook_processor::{WebhookProcessor, WebhookProcessorError};

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// POST /payment/webhook
///
/// The body is taken raw: the signature covers the exact bytes sent.
pub async fn handle_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_name = state.processor.signature_header();
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match state
        .processor
        .process_webhook(&body, signature.as_deref())
        .await
    {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Webhook acknowledged");
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ok", "result": outcome })),
            )
                .into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            let err = AppError::new(AppErrorKind::Domain(DomainError::InvalidSignature));
            match get_request_id_from_headers(&headers) {
                Some(request_id) => err.with_request_id(request_id).into_response(),
                None => err.into_response(),
            }
        }
        Err(WebhookProcessorError::MalformedPayload(e)) => {
            warn!(error = %e, "Webhook payload rejected");
            (StatusCode::BAD_REQUEST, "Invalid payload").into_response()
        }
        Err(e @ WebhookProcessorError::Transient(_)) => {
            // Non-2xx so the gateway redelivers
            error!(error = %e, "Webhook processing failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Temporarily unavailable").into_response()
        }
    }
}
