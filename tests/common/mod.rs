//! Shared fixtures: a scripted gateway that signs and parses webhooks like
//! Paystack but never leaves the process.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticketpay_backend::database::MemoryIntentStore;
use ticketpay_backend::payments::utils::sign_hmac_sha512_hex;
use ticketpay_backend::payments::{
    AuthorizeOptions, AuthorizeResponse, GatewayEvent, GatewayStatus, PaymentError,
    PaymentGateway, PaymentIntent, PaymentResult, PaystackConfig, PaystackGateway,
    VerifyResponse,
};
use ticketpay_backend::services::{IntentLifecycleManager, LifecycleConfig};

pub const WEBHOOK_SECRET: &str = "sk_test_ticketpay_webhooks";

#[derive(Debug, Clone)]
pub enum AuthorizeScript {
    Succeed,
    /// Never answers; the lifecycle timeout fires
    Hang,
    Reject(String),
}

#[derive(Debug, Clone)]
pub enum VerifyScript {
    /// Report the stored amount and currency with this status
    Status(GatewayStatus),
    /// Report an explicit amount
    Amount(GatewayStatus, i64),
    Unreachable,
}

pub struct ScriptedGateway {
    paystack: PaystackGateway,
    authorize: Mutex<AuthorizeScript>,
    verify: Mutex<VerifyScript>,
    seen: Mutex<HashMap<String, (i64, String)>>,
    pub authorize_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        let paystack = PaystackGateway::new(PaystackConfig {
            secret_key: WEBHOOK_SECRET.to_string(),
            public_key: Some("pk_test_ticketpay".to_string()),
            ..PaystackConfig::default()
        })
        .expect("valid paystack config");

        Self {
            paystack,
            authorize: Mutex::new(AuthorizeScript::Succeed),
            verify: Mutex::new(VerifyScript::Status(GatewayStatus::Pending)),
            seen: Mutex::new(HashMap::new()),
            authorize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_authorize(&self, script: AuthorizeScript) {
        *self.authorize.lock().unwrap() = script;
    }

    pub fn script_verify(&self, script: VerifyScript) {
        *self.verify.lock().unwrap() = script;
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn authorize(
        &self,
        intent: &PaymentIntent,
        _options: &AuthorizeOptions,
    ) -> PaymentResult<AuthorizeResponse> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().insert(
            intent.reference.clone(),
            (intent.amount_minor_units, intent.currency.clone()),
        );

        let script = self.authorize.lock().unwrap().clone();
        match script {
            AuthorizeScript::Succeed => Ok(AuthorizeResponse {
                authorization_url: format!("https://checkout.paystack.test/{}", intent.reference),
                gateway_transaction_id: format!("access_{}", intent.reference),
                access_code: Some(format!("access_{}", intent.reference)),
            }),
            AuthorizeScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(PaymentError::Timeout { timeout_secs: 3600 })
            }
            AuthorizeScript::Reject(message) => Err(PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message,
                provider_code: None,
                retryable: false,
            }),
        }
    }

    async fn verify(&self, reference: &str) -> PaymentResult<VerifyResponse> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let (amount, currency) = self
            .seen
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or((0, "NGN".to_string()));

        let script = self.verify.lock().unwrap().clone();
        let (status, amount) = match script {
            VerifyScript::Status(status) => (status, amount),
            VerifyScript::Amount(status, amount) => (status, amount),
            VerifyScript::Unreachable => {
                return Err(PaymentError::NetworkError {
                    message: "connection refused".to_string(),
                })
            }
        };

        Ok(VerifyResponse {
            status,
            amount_minor_units: amount,
            currency,
            gateway_transaction_id: Some(format!("trx_{}", reference)),
            event_id: None,
            gateway_response: Some("Approved".to_string()),
            paid_at: None,
        })
    }

    fn validate_webhook_signature(&self, raw_payload: &[u8], signature: &str) -> bool {
        self.paystack.validate_webhook_signature(raw_payload, signature)
    }

    fn parse_webhook_event(&self, raw_payload: &[u8]) -> PaymentResult<GatewayEvent> {
        self.paystack.parse_webhook_event(raw_payload)
    }

    fn name(&self) -> &'static str {
        "paystack"
    }

    fn signature_header(&self) -> &'static str {
        self.paystack.signature_header()
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        self.paystack.supported_currencies()
    }

    fn supported_channels(&self) -> &'static [&'static str] {
        self.paystack.supported_channels()
    }

    fn public_key_configured(&self) -> bool {
        true
    }

    fn webhook_secret_configured(&self) -> bool {
        true
    }
}

pub struct Harness {
    pub store: Arc<MemoryIntentStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub lifecycle: Arc<IntentLifecycleManager>,
}

pub fn harness() -> Harness {
    harness_with(LifecycleConfig {
        gateway_timeout: Duration::from_millis(200),
        ..LifecycleConfig::default()
    })
}

pub fn harness_with(config: LifecycleConfig) -> Harness {
    let store = Arc::new(MemoryIntentStore::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let lifecycle = Arc::new(IntentLifecycleManager::new(
        store.clone(),
        gateway.clone(),
        config,
    ));
    Harness {
        store,
        gateway,
        lifecycle,
    }
}

/// Paystack-shaped charge event body
pub fn charge_event(
    event: &str,
    reference: &str,
    transaction_id: u64,
    status: &str,
    amount: i64,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event": event,
        "data": {
            "id": transaction_id,
            "reference": reference,
            "status": status,
            "amount": amount,
            "currency": "NGN",
            "gateway_response": "Successful"
        }
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    sign_hmac_sha512_hex(body, WEBHOOK_SECRET)
}
