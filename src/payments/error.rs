use thiserror::Error;

use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failure talking to, or interpreting data from, a payment gateway.
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("invalid payment request: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("gateway unreachable: {message}")]
    NetworkError { message: String },

    #[error("gateway gave no answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("gateway rate limited the request: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("webhook rejected: {message}")]
    WebhookVerificationError { message: String },

    #[error("{provider} error: {message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NetworkError { .. }
            | PaymentError::Timeout { .. }
            | PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::ValidationError { .. }
            | PaymentError::WebhookVerificationError { .. } => false,
        }
    }

    /// The gateway may or may not have acted on the call. Callers re-verify
    /// instead of recording a failure.
    pub fn is_indeterminate(&self) -> bool {
        self.is_retryable()
    }
}

const GATEWAY: &str = "payment gateway";

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::Timeout { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: GATEWAY.to_string(),
                    timeout_secs,
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: GATEWAY.to_string(),
                retry_after: retry_after_seconds,
            }),
            PaymentError::ProviderError {
                ref provider,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: provider.clone(),
                message: err.to_string(),
                is_retryable: retryable,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: GATEWAY.to_string(),
                message: other.to_string(),
                is_retryable: other.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}
