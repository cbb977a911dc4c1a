use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("could not build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send an idempotent request, retrying transport errors, 429 and 5xx
    /// responses with exponential backoff.
    pub async fn request_json<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&B>,
    ) -> PaymentResult<T> {
        self.execute(method, url, bearer_token, body, self.max_retries)
            .await
    }

    /// Send a request exactly once. Used for calls that create remote state.
    pub async fn request_json_once<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&B>,
    ) -> PaymentResult<T> {
        self.execute(method, url, bearer_token, body, 0).await
    }

    async fn execute<T: DeserializeOwned, B: Serialize + Sync + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&B>,
        max_retries: u32,
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let error = match self.attempt(method.clone(), url, bearer_token, body).await {
                Attempt::Done(text) => {
                    return serde_json::from_str::<T>(&text).map_err(|e| {
                        PaymentError::ProviderError {
                            provider: "http".to_string(),
                            message: format!("unexpected gateway JSON: {}", e),
                            provider_code: None,
                            retryable: true,
                        }
                    })
                }
                Attempt::Final(error) => return Err(error),
                Attempt::Retry(error) => error,
            };

            if attempt >= max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!(%url, attempt, error = %error, "gateway call failed, backing off");
            tokio::time::sleep(backoff(attempt - 1)).await;
        }
    }

    async fn attempt<B: Serialize + Sync + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&B>,
    ) -> Attempt {
        let mut request = self.client.request(method, url).timeout(self.timeout);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry(PaymentError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Err(e) => {
                return Attempt::Retry(PaymentError::NetworkError {
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Attempt::Retry(PaymentError::NetworkError {
                    message: format!("response body lost: {}", e),
                })
            }
        };

        if status.is_success() {
            Attempt::Done(text)
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Attempt::Retry(PaymentError::RateLimitError {
                message: provider_message(&text),
                retry_after_seconds: None,
            })
        } else {
            let error = PaymentError::ProviderError {
                provider: "http".to_string(),
                message: format!("HTTP {}: {}", status, provider_message(&text)),
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            };
            if status.is_server_error() {
                Attempt::Retry(error)
            } else {
                Attempt::Final(error)
            }
        }
    }
}

/// Result of a single HTTP exchange with the gateway
enum Attempt {
    Done(String),
    /// Worth another try if the budget allows
    Retry(PaymentError),
    Final(PaymentError),
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * (1u64 << attempt.min(6)))
}

/// Pull the human readable message out of a gateway error body when present.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Check a hex encoded HMAC-SHA512 signature over `payload`.
///
/// The comparison runs in constant time via `Mac::verify_slice`.
pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Hex encoded HMAC-SHA512, used by tests and tooling that sign payloads.
pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let mut mac = match <Hmac<Sha512> as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_hmac_verification_accepts_valid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        let signature = sign_hmac_sha512_hex(payload, "secret");
        assert_eq!(signature.len(), 128);
        assert!(verify_hmac_sha512_hex(payload, "secret", &signature));
        assert!(verify_hmac_sha512_hex(
            payload,
            "secret",
            &signature.to_uppercase()
        ));
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        assert!(!verify_hmac_sha512_hex(payload, "secret", "not-a-valid-signature"));

        let other_secret = sign_hmac_sha512_hex(payload, "other");
        assert!(!verify_hmac_sha512_hex(payload, "secret", &other_secret));

        let tampered = sign_hmac_sha512_hex(br#"{"event":"charge.failed"}"#, "secret");
        assert!(!verify_hmac_sha512_hex(payload, "secret", &tampered));
    }

    #[test]
    fn provider_message_prefers_gateway_message() {
        assert_eq!(
            provider_message(r#"{"status":false,"message":"Transaction reference not found"}"#),
            "Transaction reference not found"
        );
        assert_eq!(provider_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_millis(1000));
        assert_eq!(backoff(20), backoff(6));
    }
}
