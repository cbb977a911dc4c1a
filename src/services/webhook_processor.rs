use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::intent_store::StoreError;
use crate::payments::types::{GatewayEvent, IntentState};
use crate::services::intent_lifecycle::{
    ApplyOutcome, GatewayStatusUpdate, IntentLifecycleManager, LifecycleError,
};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    /// Internal failure; the gateway should redeliver
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl WebhookProcessorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookProcessorError::Transient(_))
    }
}

/// What happened to an authenticated delivery. Every variant is acknowledged
/// to the gateway with a 2xx.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        reference: String,
        state: IntentState,
    },
    Duplicate {
        reference: String,
        state: IntentState,
    },
    AlreadyTerminal {
        reference: String,
        state: IntentState,
    },
    Pending {
        reference: String,
        state: IntentState,
    },
    /// Authentic but not about a known intent or not a payment event
    Ignored { reason: String },
    /// Authentic but inconsistent with the stored intent; never applied
    Rejected { reference: String, reason: String },
}

/// Turns signed gateway deliveries into lifecycle status updates, exactly
/// once per gateway event id.
pub struct WebhookProcessor {
    lifecycle: Arc<IntentLifecycleManager>,
}

impl WebhookProcessor {
    pub fn new(lifecycle: Arc<IntentLifecycleManager>) -> Self {
        Self { lifecycle }
    }

    pub fn signature_header(&self) -> &'static str {
        self.lifecycle.gateway().signature_header()
    }

    pub async fn process_webhook(
        &self,
        raw_payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let gateway = self.lifecycle.gateway();

        let signature = match signature {
            Some(signature) if !signature.trim().is_empty() => signature,
            _ => {
                warn!(provider = gateway.name(), "Webhook rejected: missing signature");
                return Err(WebhookProcessorError::InvalidSignature);
            }
        };
        if !gateway.validate_webhook_signature(raw_payload, signature) {
            warn!(provider = gateway.name(), "Webhook rejected: invalid signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = gateway.parse_webhook_event(raw_payload).map_err(|e| {
            warn!(provider = gateway.name(), error = %e, "Webhook payload could not be parsed");
            WebhookProcessorError::MalformedPayload(e.to_string())
        })?;

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            reference = ?event.reference,
            "Webhook received"
        );
        self.process_event(event).await
    }

    async fn process_event(
        &self,
        event: GatewayEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let Some(reference) = event.reference.clone() else {
            return Ok(ignored(&event, "event carries no payment reference"));
        };
        let Some(status) = event.status else {
            return Ok(ignored(&event, "event type does not describe a payment status"));
        };

        // Replays short-circuit before any mutation is attempted
        match self.lifecycle.store().get(&reference).await {
            Ok(intent) if intent.has_reconciled(&event.event_id) => {
                info!(event_id = %event.event_id, reference = %reference, "Webhook already processed");
                return Ok(WebhookOutcome::Duplicate {
                    reference,
                    state: intent.state,
                });
            }
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                warn!(event_id = %event.event_id, reference = %reference, "Webhook for unknown reference");
                return Ok(ignored(&event, "unknown payment reference"));
            }
            Err(e) => return Err(WebhookProcessorError::Transient(e.to_string())),
        }

        let update = GatewayStatusUpdate {
            status,
            event_id: event.event_id.clone(),
            gateway_transaction_id: event.gateway_transaction_id.clone(),
            amount_minor_units: event.amount_minor_units,
            currency: event.currency.clone(),
        };

        match self.lifecycle.apply_gateway_status(&reference, update).await {
            Ok(outcome) => {
                let state = outcome.intent().state;
                info!(
                    event_id = %event.event_id,
                    reference = %reference,
                    outcome = outcome.label(),
                    state = %state,
                    "Webhook processed successfully"
                );
                Ok(match outcome {
                    ApplyOutcome::Transitioned(_) => WebhookOutcome::Applied { reference, state },
                    ApplyOutcome::Duplicate(_) => WebhookOutcome::Duplicate { reference, state },
                    ApplyOutcome::AlreadyTerminal(_) => {
                        WebhookOutcome::AlreadyTerminal { reference, state }
                    }
                    ApplyOutcome::Pending(_) => WebhookOutcome::Pending { reference, state },
                })
            }
            Err(LifecycleError::NotFound(_)) => Ok(ignored(&event, "unknown payment reference")),
            Err(LifecycleError::AmountMismatch {
                expected, reported, ..
            }) => Ok(WebhookOutcome::Rejected {
                reference,
                reason: format!("amount mismatch: expected {}, reported {}", expected, reported),
            }),
            Err(LifecycleError::Store(e)) => {
                error!(event_id = %event.event_id, reference = %reference, error = %e, "Webhook processing failed");
                Err(WebhookProcessorError::Transient(e.to_string()))
            }
            Err(e) => {
                warn!(event_id = %event.event_id, reference = %reference, error = %e, "Webhook not applied");
                Ok(WebhookOutcome::Rejected {
                    reference,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn ignored(event: &GatewayEvent, reason: &str) -> WebhookOutcome {
    info!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        reason,
        "Webhook ignored"
    );
    WebhookOutcome::Ignored {
        reason: reason.to_string(),
    }
}
