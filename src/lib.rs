//! Payment intents and webhook reconciliation for ticket purchases.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::api::payments::PaymentsState;
use crate::api::webhooks::WebhookState;
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::{IntentLifecycleManager, WebhookProcessor};

async fn root() -> &'static str {
    "Welcome to TicketPay Backend API"
}

/// Full HTTP surface with request-id and request logging layers.
pub fn build_router(lifecycle: Arc<IntentLifecycleManager>) -> Router {
    let health_checker = HealthChecker::new(lifecycle.store().clone(), lifecycle.gateway().clone());
    let processor = Arc::new(WebhookProcessor::new(lifecycle.clone()));

    let payment_routes = Router::new()
        .route("/payment/initialize", post(api::payments::initialize_payment))
        .route("/payment/verify", post(api::payments::verify_payment))
        .route("/payment/callback", get(api::payments::payment_callback))
        .route("/payment/intents/{reference}", get(api::payments::get_intent))
        .route("/payment/methods", get(api::payments::payment_methods))
        .route("/payment/currencies", get(api::payments::payment_currencies))
        .route("/payment/verify-config", get(api::payments::verify_config))
        .with_state(PaymentsState { lifecycle });

    let webhook_routes = Router::new()
        .route("/payment/webhook", post(api::webhooks::handle_webhook))
        .with_state(WebhookState { processor });

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .with_state(health_checker);

    Router::new()
        .route("/", get(root))
        .merge(payment_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
