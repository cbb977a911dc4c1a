//! Frontend payment endpoints: intent creation, verification and
//! capability introspection.

use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::{get_request_id_from_headers, json_error_response};
use crate::payments::types::{AuthorizeOptions, IntentState, Metadata, NewIntent, PaymentIntent};
use crate::services::intent_lifecycle::{IntentLifecycleManager, VerifyOutcome};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct PaymentsState {
    pub lifecycle: Arc<IntentLifecycleManager>,
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentRequest {
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub email: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub channels: Vec<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentResponse {
    pub reference: String,
    /// Absent when the gateway could not be reached; verify later
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub reference: String,
    /// One of `success`, `failed`, `expired`, `pending`
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub gateway_transaction_id: Option<String>,
    /// Exactly as supplied at initialization
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub reference: Option<String>,
    /// Paystack appends both `trxref` and `reference` to the callback URL
    pub trxref: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentView {
    pub reference: String,
    pub state: IntentState,
    pub amount: i64,
    pub currency: String,
    pub gateway_transaction_id: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<PaymentIntent> for IntentView {
    fn from(intent: PaymentIntent) -> Self {
        Self {
            reference: intent.reference,
            state: intent.state,
            amount: intent.amount_minor_units,
            currency: intent.currency,
            gateway_transaction_id: intent.gateway_transaction_id,
            metadata: intent.metadata,
            created_at: intent.created_at,
            updated_at: intent.updated_at,
            expires_at: intent.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentMethodsResponse {
    pub provider: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrenciesResponse {
    pub currencies: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfigResponse {
    pub provider: String,
    pub public_key_configured: bool,
    pub webhook_secret_configured: bool,
    pub callback_url: Option<String>,
    pub intent_ttl_secs: i64,
}

/// Status the purchase UI may show. Anything not terminal is `pending`.
pub fn client_status(state: IntentState) -> &'static str {
    match state {
        IntentState::Succeeded => "success",
        IntentState::Failed => "failed",
        IntentState::Expired => "expired",
        IntentState::Created | IntentState::Authorizing => "pending",
    }
}

fn verify_response(outcome: VerifyOutcome) -> VerifyPaymentResponse {
    let intent = outcome.intent;
    let status = if outcome.indeterminate {
        "pending"
    } else {
        client_status(intent.state)
    };
    VerifyPaymentResponse {
        status: status.to_string(),
        reference: intent.reference,
        amount: intent.amount_minor_units,
        currency: intent.currency,
        gateway_transaction_id: intent.gateway_transaction_id,
        metadata: intent.metadata,
    }
}

fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> Response {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id).into_response(),
        None => err.into_response(),
    }
}

fn missing_reference() -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
        field: "reference".to_string(),
    }))
}

fn body_rejection(rejection: JsonRejection, headers: &HeaderMap) -> Response {
    json_error_response(
        StatusCode::BAD_REQUEST,
        rejection.body_text(),
        get_request_id_from_headers(headers),
    )
    .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /payment/initialize
pub async fn initialize_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    body: Result<Json<InitializePaymentRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection, &headers),
    };

    let request = NewIntent {
        amount_minor_units: body.amount,
        currency: body.currency,
        payer_email: body.email,
        metadata: body.metadata,
    };
    let options = AuthorizeOptions {
        callback_url: body.callback_url,
        channels: body.channels,
    };

    match state.lifecycle.create_intent(request, options).await {
        Ok(created) => {
            let status = if created.authorization_url.is_some() {
                "authorizing"
            } else {
                "pending"
            };
            info!(reference = %created.intent.reference, status, "payment initialized");
            (
                StatusCode::OK,
                Json(InitializePaymentResponse {
                    reference: created.intent.reference,
                    authorization_url: created.authorization_url,
                    access_code: created.access_code,
                    status: status.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => with_request_id(e, &headers),
    }
}

/// POST /payment/verify
pub async fn verify_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    body: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection, &headers),
    };
    verify_reference(&state, body.reference.trim(), &headers).await
}

/// GET /payment/callback?reference=...
pub async fn payment_callback(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let reference = query
        .reference
        .or(query.trxref)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    match reference {
        Some(reference) => {
            info!(reference = %reference, "payer returned from gateway");
            verify_reference(&state, &reference, &headers).await
        }
        None => with_request_id(missing_reference(), &headers),
    }
}

async fn verify_reference(state: &PaymentsState, reference: &str, headers: &HeaderMap) -> Response {
    if reference.is_empty() {
        return with_request_id(missing_reference(), headers);
    }

    match state.lifecycle.poll_verify(reference).await {
        Ok(outcome) => (StatusCode::OK, Json(verify_response(outcome))).into_response(),
        Err(e) => with_request_id(e, headers),
    }
}

/// GET /payment/intents/{reference}
pub async fn get_intent(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Response {
    match state.lifecycle.get_intent(&reference).await {
        Ok(intent) => (StatusCode::OK, Json(IntentView::from(intent))).into_response(),
        Err(e) => with_request_id(e, &headers),
    }
}

/// GET /payment/methods
pub async fn payment_methods(State(state): State<PaymentsState>) -> Json<PaymentMethodsResponse> {
    let gateway = state.lifecycle.gateway();
    let supported = gateway.supported_channels();
    let channels = state
        .lifecycle
        .config()
        .channels
        .iter()
        .filter(|c| supported.contains(&c.as_str()))
        .cloned()
        .collect();

    Json(PaymentMethodsResponse {
        provider: gateway.name().to_string(),
        channels,
    })
}

/// GET /payment/currencies
pub async fn payment_currencies(State(state): State<PaymentsState>) -> Json<CurrenciesResponse> {
    Json(CurrenciesResponse {
        currencies: state.lifecycle.supported_currencies(),
    })
}

/// GET /payment/verify-config
pub async fn verify_config(State(state): State<PaymentsState>) -> Json<VerifyConfigResponse> {
    let gateway = state.lifecycle.gateway();
    let config = state.lifecycle.config();
    Json(VerifyConfigResponse {
        provider: gateway.name().to_string(),
        public_key_configured: gateway.public_key_configured(),
        webhook_secret_configured: gateway.webhook_secret_configured(),
        callback_url: config.callback_url.clone(),
        intent_ttl_secs: config.intent_ttl.num_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_status_never_reports_open_intents_as_failed() {
        assert_eq!(client_status(IntentState::Created), "pending");
        assert_eq!(client_status(IntentState::Authorizing), "pending");
        assert_eq!(client_status(IntentState::Succeeded), "success");
        assert_eq!(client_status(IntentState::Failed), "failed");
        assert_eq!(client_status(IntentState::Expired), "expired");
    }

    #[test]
    fn initialize_request_is_camel_case() {
        let body: InitializePaymentRequest = serde_json::from_value(serde_json::json!({
            "amount": 50000,
            "currency": "ngn",
            "email": "fan@example.com",
            "metadata": {"eventId": "evt_42", "seats": 2},
            "callbackUrl": "https://tickets.example.com/done"
        }))
        .unwrap();

        assert_eq!(body.amount, 50000);
        assert_eq!(body.metadata.len(), 2);
        assert!(body.channels.is_empty());
        assert_eq!(
            body.callback_url.as_deref(),
            Some("https://tickets.example.com/done")
        );
    }
}
