//! Application error taxonomy.
//!
//! Every handler failure becomes an [`AppError`]; its kind decides the HTTP
//! status, the stable [`ErrorCode`] and the message a payer may see.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::intent_store::StoreError;

/// Machine-readable code carried in every error body
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IntentNotFound,
    AmountMismatch,
    ReferenceExhausted,
    InvalidSignature,
    InvalidCurrency,
    InvalidAmount,
    DatabaseError,
    PaymentProviderError,
    RateLimitError,
    ExternalServiceTimeout,
    InternalError,
    ValidationError,
}

/// Payment-domain errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No intent exists with this reference
    IntentNotFound { reference: String },
    /// Gateway reported an amount or currency different from the stored intent
    AmountMismatch {
        reference: String,
        expected: String,
        reported: String,
    },
    /// Could not find a free reference within the retry budget
    ReferenceExhausted { attempts: u32 },
    /// Webhook signature missing or invalid
    InvalidSignature,
}

/// Intent store failures
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
}

/// External service errors (payment gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Rejected request input
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Currency not in the supported set
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// HTTP status for the error body
    pub fn status_code(&self) -> u16 {
        use AppErrorKind::*;
        match &self.kind {
            Domain(DomainError::IntentNotFound { .. }) => 404,
            Domain(DomainError::AmountMismatch { .. }) => 422,
            Domain(DomainError::ReferenceExhausted { .. }) => 503,
            Domain(DomainError::InvalidSignature) => 401,
            Infrastructure(InfrastructureError::Database { is_retryable: true, .. }) => 503,
            Infrastructure(_) => 500,
            External(ExternalError::PaymentProvider { .. }) => 502,
            External(ExternalError::RateLimit { .. }) => 429,
            External(ExternalError::Timeout { .. }) => 504,
            Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        use AppErrorKind::*;
        match &self.kind {
            Domain(DomainError::IntentNotFound { .. }) => ErrorCode::IntentNotFound,
            Domain(DomainError::AmountMismatch { .. }) => ErrorCode::AmountMismatch,
            Domain(DomainError::ReferenceExhausted { .. }) => ErrorCode::ReferenceExhausted,
            Domain(DomainError::InvalidSignature) => ErrorCode::InvalidSignature,
            Infrastructure(InfrastructureError::Database { .. }) => ErrorCode::DatabaseError,
            External(ExternalError::PaymentProvider { .. }) => ErrorCode::PaymentProviderError,
            External(ExternalError::RateLimit { .. }) => ErrorCode::RateLimitError,
            External(ExternalError::Timeout { .. }) => ErrorCode::ExternalServiceTimeout,
            Validation(ValidationError::InvalidCurrency { .. }) => ErrorCode::InvalidCurrency,
            Validation(ValidationError::InvalidAmount { .. }) => ErrorCode::InvalidAmount,
            Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Message safe to show a payer; never includes internal detail
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::IntentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::AmountMismatch { reference, .. } => {
                    format!(
                        "Payment '{}' could not be confirmed: gateway reported a different amount",
                        reference
                    )
                }
                DomainError::ReferenceExhausted { .. } => {
                    "Could not allocate a payment reference. Please try again".to_string()
                }
                DomainError::InvalidSignature => "Invalid webhook signature".to_string(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable: true, .. }) => {
                "The payment gateway is temporarily unavailable. Please try again".to_string()
            }
            AppErrorKind::External(ExternalError::PaymentProvider { .. }) => {
                "The payment gateway declined the request".to_string()
            }
            AppErrorKind::External(ExternalError::RateLimit {
                retry_after: Some(secs),
                ..
            }) => format!("Too many requests to the payment gateway. Retry in {}s", secs),
            AppErrorKind::External(ExternalError::RateLimit { .. }) => {
                "Too many requests to the payment gateway. Retry shortly".to_string()
            }
            AppErrorKind::External(ExternalError::Timeout { service, .. }) => {
                format!("No answer from the {} in time. Check the payment status shortly", service)
            }
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Whether the client may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => matches!(err, DomainError::ReferenceExhausted { .. }),
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. })
            | AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(_) => true,
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// PaymentError and LifecycleError convert in their own modules

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::NotFound(reference) => {
                AppErrorKind::Domain(DomainError::IntentNotFound { reference })
            }
            StoreError::Unavailable(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
            other => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: other.to_string(),
                is_retryable: false,
            }),
        };
        AppError::new(kind)
    }
}

pub type AppResult<T> = Result<T, AppError>;
