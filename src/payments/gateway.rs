use crate::payments::error::PaymentResult;
use crate::payments::types::{
    AuthorizeOptions, AuthorizeResponse, GatewayEvent, PaymentIntent, VerifyResponse,
};
use async_trait::async_trait;

/// Translates intent operations to and from a hosted payment gateway.
///
/// Implementations perform at most one logical remote call per method and
/// never touch local intent state.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the gateway for an authorization URL for `intent`.
    async fn authorize(
        &self,
        intent: &PaymentIntent,
        options: &AuthorizeOptions,
    ) -> PaymentResult<AuthorizeResponse>;

    /// Fetch the gateway's view of `reference`. Idempotent.
    async fn verify(&self, reference: &str) -> PaymentResult<VerifyResponse>;

    /// Constant-time check of a webhook signature against the configured secret.
    fn validate_webhook_signature(&self, raw_payload: &[u8], signature: &str) -> bool;

    fn parse_webhook_event(&self, raw_payload: &[u8]) -> PaymentResult<GatewayEvent>;

    fn name(&self) -> &'static str;

    /// Header carrying the webhook signature
    fn signature_header(&self) -> &'static str;

    fn supported_currencies(&self) -> &'static [&'static str];

    fn supported_channels(&self) -> &'static [&'static str];

    fn public_key_configured(&self) -> bool;

    fn webhook_secret_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{GatewayStatus, Metadata, NewIntent};
    use chrono::{Duration, Utc};

    struct StaticGateway;

    #[async_trait]
    impl PaymentGateway for StaticGateway {
        async fn authorize(
            &self,
            intent: &PaymentIntent,
            _options: &AuthorizeOptions,
        ) -> PaymentResult<AuthorizeResponse> {
            Ok(AuthorizeResponse {
                authorization_url: format!("https://checkout.example.com/{}", intent.reference),
                gateway_transaction_id: "gw_1".to_string(),
                access_code: None,
            })
        }

        async fn verify(&self, _reference: &str) -> PaymentResult<VerifyResponse> {
            Ok(VerifyResponse {
                status: GatewayStatus::Success,
                amount_minor_units: 1000,
                currency: "NGN".to_string(),
                gateway_transaction_id: Some("gw_1".to_string()),
                event_id: None,
                gateway_response: Some("Approved".to_string()),
                paid_at: None,
            })
        }

        fn validate_webhook_signature(&self, _raw_payload: &[u8], signature: &str) -> bool {
            signature == "ok"
        }

        fn parse_webhook_event(&self, _raw_payload: &[u8]) -> PaymentResult<GatewayEvent> {
            unimplemented!("not exercised")
        }

        fn name(&self) -> &'static str {
            "static"
        }

        fn signature_header(&self) -> &'static str {
            "x-static-signature"
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["NGN"]
        }

        fn supported_channels(&self) -> &'static [&'static str] {
            &["card"]
        }

        fn public_key_configured(&self) -> bool {
            false
        }

        fn webhook_secret_configured(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn trait_is_object_safe_and_usable() {
        let gateway: Box<dyn PaymentGateway> = Box::new(StaticGateway);
        let intent = PaymentIntent::new(
            "TKT-obj".to_string(),
            NewIntent {
                amount_minor_units: 1000,
                currency: "NGN".to_string(),
                payer_email: "a@b.co".to_string(),
                metadata: Metadata::new(),
            },
            Duration::minutes(30),
            Utc::now(),
        );
        let auth = gateway
            .authorize(&intent, &AuthorizeOptions::default())
            .await
            .expect("authorize should succeed");
        assert!(auth.authorization_url.ends_with("TKT-obj"));

        let verified = gateway.verify("TKT-obj").await.expect("verify should succeed");
        assert_eq!(verified.status, GatewayStatus::Success);
        assert!(gateway.validate_webhook_signature(b"{}", "ok"));
    }
}
