use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    AuthorizeOptions, AuthorizeResponse, GatewayEvent, GatewayStatus, Metadata, PaymentIntent,
    VerifyResponse,
};
use crate::payments::utils::{verify_hmac_sha512_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

#[derive(Clone)]
pub struct PaystackConfig {
    pub public_key: Option<String>,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl fmt::Debug for PaystackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaystackConfig")
            .field("public_key", &self.public_key.as_ref().map(|_| "<set>"))
            .field("secret_key", &"<redacted>")
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: String::new(),
            webhook_secret: None,
            base_url: "https://api.paystack.co".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("PAYSTACK_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "PAYSTACK_SECRET_KEY environment variable is required".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;

        Ok(Self {
            public_key: std::env::var("PAYSTACK_PUBLIC_KEY").ok(),
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: std::env::var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            timeout_secs: std::env::var("PAYSTACK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYSTACK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            secret_key,
        })
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        if config.secret_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "paystack secret key must not be empty".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            });
        }
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Paystack signs webhooks with the secret key unless a dedicated
    /// webhook secret is configured.
    fn webhook_secret(&self) -> &str {
        self.config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key)
    }

    fn rejected(message: String) -> PaymentError {
        PaymentError::ProviderError {
            provider: "paystack".to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }
}

/// Collapse Paystack's transaction statuses onto the three the lifecycle knows.
pub fn map_paystack_status(status: &str) -> GatewayStatus {
    match status.trim().to_lowercase().as_str() {
        "success" => GatewayStatus::Success,
        "failed" | "reversed" => GatewayStatus::Failed,
        // abandoned, ongoing, pending, processing, queued
        _ => GatewayStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn authorize(
        &self,
        intent: &PaymentIntent,
        options: &AuthorizeOptions,
    ) -> PaymentResult<AuthorizeResponse> {
        let payload = PaystackInitializeRequest::new(intent, options);

        // Initialization creates remote state, so it is sent once and any
        // transport failure is surfaced as indeterminate.
        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json_once(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                Some(&self.config.secret_key),
                Some(&payload),
            )
            .await?;

        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            (_, _) => return Err(Self::rejected(raw.message)),
        };
        info!(reference = %data.reference, "paystack transaction initialized");

        Ok(AuthorizeResponse {
            authorization_url: data.authorization_url,
            gateway_transaction_id: data.access_code.clone(),
            access_code: Some(data.access_code),
        })
    }

    async fn verify(&self, reference: &str) -> PaymentResult<VerifyResponse> {
        if reference.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "reference is required".to_string(),
                field: Some("reference".to_string()),
            });
        }

        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", reference)),
                Some(&self.config.secret_key),
                None::<&()>,
            )
            .await?;
        let data = match (raw.status, raw.data) {
            (true, Some(data)) => data,
            (_, _) => return Err(Self::rejected(raw.message)),
        };

        let amount_minor_units =
            i64::try_from(data.amount).map_err(|_| Self::rejected("amount overflow".to_string()))?;
        debug!(reference = %reference, status = %data.status, "paystack verify response");

        Ok(VerifyResponse {
            status: map_paystack_status(&data.status),
            amount_minor_units,
            currency: data.currency.to_uppercase(),
            gateway_transaction_id: data.id.map(|id| id.to_string()),
            event_id: None,
            gateway_response: data.gateway_response,
            paid_at: data.paid_at,
        })
    }

    fn validate_webhook_signature(&self, raw_payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha512_hex(raw_payload, self.webhook_secret(), signature)
    }

    fn parse_webhook_event(&self, raw_payload: &[u8]) -> PaymentResult<GatewayEvent> {
        let parsed: JsonValue = serde_json::from_slice(raw_payload).map_err(|e| {
            PaymentError::WebhookVerificationError {
                message: format!("invalid webhook JSON payload: {}", e),
            }
        })?;

        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data");
        let str_field = |name: &str| {
            data.and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        };

        let transaction_id = data.and_then(|d| d.get("id")).and_then(|v| match v {
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });

        // Paystack has no per-delivery id; the event type plus transaction id
        // identifies one real-world event. Fall back to a payload digest.
        let event_id = match &transaction_id {
            Some(id) => format!("{}:{}", event_type, id),
            None => format!("payload:{}", hex::encode(Sha256::digest(raw_payload))),
        };

        // Only charge events describe a payment; transfers and refunds share
        // the envelope but must never move an intent.
        let status = if event_type.starts_with("charge.") {
            str_field("status")
                .map(|s| map_paystack_status(&s))
                .or_else(|| match event_type.as_str() {
                    "charge.success" => Some(GatewayStatus::Success),
                    "charge.failed" => Some(GatewayStatus::Failed),
                    _ => None,
                })
        } else {
            None
        };

        Ok(GatewayEvent {
            event_id,
            reference: str_field("reference"),
            status,
            amount_minor_units: data.and_then(|d| d.get("amount")).and_then(|v| v.as_i64()),
            currency: str_field("currency").map(|c| c.to_uppercase()),
            gateway_transaction_id: transaction_id,
            event_type,
            payload: parsed,
            received_at: chrono::Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "paystack"
    }

    fn signature_header(&self) -> &'static str {
        PAYSTACK_SIGNATURE_HEADER
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "ZAR", "KES", "USD"]
    }

    fn supported_channels(&self) -> &'static [&'static str] {
        &[
            "card",
            "bank",
            "ussd",
            "qr",
            "mobile_money",
            "bank_transfer",
            "eft",
            "apple_pay",
        ]
    }

    fn public_key_configured(&self) -> bool {
        self.config
            .public_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    fn webhook_secret_configured(&self) -> bool {
        !self.webhook_secret().trim().is_empty()
    }
}

/// `POST /transaction/initialize` body. Metadata serializes straight from
/// the intent so its key order reaches Paystack unchanged.
#[derive(Debug, Serialize)]
struct PaystackInitializeRequest<'a> {
    email: &'a str,
    /// Paystack takes the amount as a string of minor units
    amount: String,
    currency: &'a str,
    reference: &'a str,
    metadata: &'a Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    channels: &'a [String],
}

impl<'a> PaystackInitializeRequest<'a> {
    fn new(intent: &'a PaymentIntent, options: &'a AuthorizeOptions) -> Self {
        Self {
            email: &intent.payer_email,
            amount: intent.amount_minor_units.to_string(),
            currency: &intent.currency,
            reference: &intent.reference,
            metadata: &intent.metadata,
            callback_url: options.callback_url.as_deref(),
            channels: &options.channels,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    #[serde(default)]
    id: Option<u64>,
    amount: u64,
    currency: String,
    status: String,
    #[serde(default)]
    paid_at: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}
