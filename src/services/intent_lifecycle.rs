//! Payment Intent Lifecycle Manager
//!
//! Owns the intent state machine. Every state change goes through the intent
//! store's compare-and-swap, so concurrent webhooks, client polls and expiry
//! sweeps for one reference are linearized without any lock held here. Losing
//! a swap is never an error: the winner already moved the intent forward.

use crate::config::PaymentConfig;
use crate::database::intent_store::{IntentStore, StoreError};
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::reference::{ReferenceGenerator, TimestampReferenceGenerator};
use crate::payments::types::{
    AuthorizeOptions, GatewayStatus, IntentEvent, IntentMutation, IntentState, NewIntent,
    PaymentIntent, VerifyResponse,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// A reference can move forward at most twice (CREATED -> AUTHORIZING ->
/// terminal), so a handful of reload-and-retry rounds always settles.
const MAX_CAS_ROUNDS: usize = 4;

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub intent_ttl: chrono::Duration,
    pub supported_currencies: Vec<String>,
    pub channels: Vec<String>,
    pub callback_url: Option<String>,
    pub max_metadata_entries: usize,
    pub max_metadata_bytes: usize,
    /// Reference generation attempts before giving up
    pub max_reference_attempts: u32,
    /// Upper bound on any single gateway call
    pub gateway_timeout: Duration,
    pub event_buffer: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::from_payment_config(&PaymentConfig::default(), Duration::from_secs(30))
    }
}

impl LifecycleConfig {
    pub fn from_payment_config(config: &PaymentConfig, gateway_timeout: Duration) -> Self {
        Self {
            intent_ttl: config.intent_ttl(),
            supported_currencies: config.supported_currencies.clone(),
            channels: config.channels.clone(),
            callback_url: config.callback_url.clone(),
            max_metadata_entries: config.max_metadata_entries,
            max_metadata_bytes: config.max_metadata_bytes,
            max_reference_attempts: 5,
            gateway_timeout,
            event_buffer: 256,
        }
    }
}

// ============================================================================
// Errors and Outcomes
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("amount {0} must be greater than zero")]
    InvalidAmount(i64),

    #[error("currency '{0}' is not supported")]
    UnsupportedCurrency(String),

    #[error("payment intent '{0}' not found")]
    NotFound(String),

    #[error("no unique reference after {0} attempts")]
    ReferenceExhausted(u32),

    /// Gateway reported a different amount or currency than the intent holds
    #[error("gateway reported {reported} for '{reference}', expected {expected}")]
    AmountMismatch {
        reference: String,
        expected: String,
        reported: String,
    },

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Store(StoreError),
}

impl LifecycleError {
    /// Transient internal failure; safe to retry the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            LifecycleError::Store(err) => err.is_transient(),
            LifecycleError::Gateway(err) => err.is_indeterminate(),
            _ => false,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(reference) => LifecycleError::NotFound(reference),
            other => LifecycleError::Store(other),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation { field, message } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field,
                    reason: message,
                }))
            }
            LifecycleError::InvalidAmount(amount) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "amount must be a positive number of minor units".to_string(),
                }))
            }
            LifecycleError::UnsupportedCurrency(currency) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency,
                    reason: "currency is not supported".to_string(),
                }))
            }
            LifecycleError::NotFound(reference) => {
                AppError::new(AppErrorKind::Domain(DomainError::IntentNotFound { reference }))
            }
            LifecycleError::ReferenceExhausted(attempts) => {
                AppError::new(AppErrorKind::Domain(DomainError::ReferenceExhausted { attempts }))
            }
            LifecycleError::AmountMismatch {
                reference,
                expected,
                reported,
            } => AppError::new(AppErrorKind::Domain(DomainError::AmountMismatch {
                reference,
                expected,
                reported,
            })),
            LifecycleError::Gateway(err) => AppError::from(err),
            LifecycleError::Store(err) => AppError::from(err),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// A status report from the gateway, from either a webhook or a verify call.
#[derive(Debug, Clone)]
pub struct GatewayStatusUpdate {
    pub status: GatewayStatus,
    pub event_id: String,
    pub gateway_transaction_id: Option<String>,
    pub amount_minor_units: Option<i64>,
    pub currency: Option<String>,
}

impl GatewayStatusUpdate {
    /// Build an update from a verify response, deriving a stable event id
    /// when the gateway does not assign one.
    pub fn from_verify(reference: &str, response: VerifyResponse) -> Self {
        let event_id = response.event_id.clone().unwrap_or_else(|| {
            format!(
                "verify:{}:{}",
                response.status,
                response.gateway_transaction_id.as_deref().unwrap_or(reference)
            )
        });
        Self {
            status: response.status,
            event_id,
            gateway_transaction_id: response.gateway_transaction_id,
            amount_minor_units: Some(response.amount_minor_units),
            currency: Some(response.currency),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// This call committed a state change
    Transitioned(PaymentIntent),
    /// The event id was already in the ledger
    Duplicate(PaymentIntent),
    /// Intent was already terminal; the event id was recorded, state untouched
    AlreadyTerminal(PaymentIntent),
    /// Gateway reported pending; no terminal transition
    Pending(PaymentIntent),
}

impl ApplyOutcome {
    pub fn intent(&self) -> &PaymentIntent {
        match self {
            ApplyOutcome::Transitioned(intent)
            | ApplyOutcome::Duplicate(intent)
            | ApplyOutcome::AlreadyTerminal(intent)
            | ApplyOutcome::Pending(intent) => intent,
        }
    }

    pub fn into_intent(self) -> PaymentIntent {
        match self {
            ApplyOutcome::Transitioned(intent)
            | ApplyOutcome::Duplicate(intent)
            | ApplyOutcome::AlreadyTerminal(intent)
            | ApplyOutcome::Pending(intent) => intent,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Transitioned(_) => "transitioned",
            ApplyOutcome::Duplicate(_) => "duplicate",
            ApplyOutcome::AlreadyTerminal(_) => "already_terminal",
            ApplyOutcome::Pending(_) => "pending",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub intent: PaymentIntent,
    /// `None` when authorization was indeterminate
    pub authorization_url: Option<String>,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub intent: PaymentIntent,
    /// The gateway could not be reached; the intent state is unchanged
    pub indeterminate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Lost the swap to a concurrent transition
    pub skipped: usize,
    pub errors: usize,
}

// ============================================================================
// Lifecycle Manager
// ============================================================================

pub struct IntentLifecycleManager {
    store: Arc<dyn IntentStore>,
    gateway: Arc<dyn PaymentGateway>,
    references: Arc<dyn ReferenceGenerator>,
    config: LifecycleConfig,
    events: broadcast::Sender<IntentEvent>,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"))
}

impl IntentLifecycleManager {
    pub fn new(
        store: Arc<dyn IntentStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: LifecycleConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            store,
            gateway,
            references: Arc::new(TimestampReferenceGenerator),
            config,
            events,
        }
    }

    pub fn with_reference_generator(mut self, generator: Arc<dyn ReferenceGenerator>) -> Self {
        self.references = generator;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntentEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn IntentStore> {
        &self.store
    }

    /// Currencies accepted for new intents: configured and gateway-supported
    pub fn supported_currencies(&self) -> Vec<String> {
        let gateway = self.gateway.supported_currencies();
        self.config
            .supported_currencies
            .iter()
            .filter(|c| gateway.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    fn emit(&self, intent: &PaymentIntent) {
        let event = IntentEvent::for_transition(intent);
        if self.events.send(event).is_err() {
            debug!(reference = %intent.reference, "no intent event subscribers");
        }
    }

    async fn call_gateway<T, F>(&self, call: F) -> PaymentResult<T>
    where
        F: Future<Output = PaymentResult<T>>,
    {
        match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout {
                timeout_secs: self.config.gateway_timeout.as_secs(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    fn validate_request(
        &self,
        request: &mut NewIntent,
        options: &AuthorizeOptions,
    ) -> LifecycleResult<()> {
        if request.amount_minor_units <= 0 {
            return Err(LifecycleError::InvalidAmount(request.amount_minor_units));
        }

        request.currency = request.currency.trim().to_uppercase();
        if !self.supported_currencies().contains(&request.currency) {
            return Err(LifecycleError::UnsupportedCurrency(request.currency.clone()));
        }

        request.payer_email = request.payer_email.trim().to_string();
        if !email_pattern().is_match(&request.payer_email) {
            return Err(LifecycleError::Validation {
                field: "email".to_string(),
                message: "email address is not valid".to_string(),
            });
        }

        request
            .metadata
            .validate(self.config.max_metadata_entries, self.config.max_metadata_bytes)
            .map_err(|e| LifecycleError::Validation {
                field: "metadata".to_string(),
                message: match e {
                    PaymentError::ValidationError { message, .. } => message,
                    other => other.to_string(),
                },
            })?;

        if let Some(channel) = options
            .channels
            .iter()
            .find(|c| !self.config.channels.contains(*c))
        {
            return Err(LifecycleError::Validation {
                field: "channels".to_string(),
                message: format!("channel '{}' is not enabled", channel),
            });
        }

        if let Some(url) = &options.callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(LifecycleError::Validation {
                    field: "callbackUrl".to_string(),
                    message: "callback URL must be an absolute http(s) URL".to_string(),
                });
            }
        }

        Ok(())
    }

    async fn insert_with_fresh_reference(
        &self,
        request: NewIntent,
    ) -> LifecycleResult<PaymentIntent> {
        let attempts = self.config.max_reference_attempts.max(1);
        for attempt in 1..=attempts {
            let now = Utc::now();
            let reference = self.references.generate(now);
            let intent = PaymentIntent::new(reference, request.clone(), self.config.intent_ttl, now);

            match self.store.insert(&intent).await {
                Ok(()) => return Ok(intent),
                Err(StoreError::DuplicateReference(reference)) => {
                    warn!(
                        reference = %reference,
                        attempt,
                        "reference collision, generating a new one"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        error!(attempts, "could not allocate a unique payment reference");
        Err(LifecycleError::ReferenceExhausted(attempts))
    }

    /// Validate, persist a CREATED intent, then ask the gateway to authorize it.
    ///
    /// If authorization is indeterminate the intent stays CREATED and is
    /// returned without an authorization URL; verification resolves it later.
    pub async fn create_intent(
        &self,
        mut request: NewIntent,
        mut options: AuthorizeOptions,
    ) -> LifecycleResult<CreatedIntent> {
        self.validate_request(&mut request, &options)?;
        if options.callback_url.is_none() {
            options.callback_url = self.config.callback_url.clone();
        }

        let intent = self.insert_with_fresh_reference(request).await?;
        info!(
            reference = %intent.reference,
            amount_minor_units = intent.amount_minor_units,
            currency = %intent.currency,
            "payment intent created"
        );

        let authorization = match self
            .call_gateway(self.gateway.authorize(&intent, &options))
            .await
        {
            Ok(authorization) => authorization,
            Err(err) if err.is_indeterminate() => {
                warn!(
                    reference = %intent.reference,
                    error = %err,
                    "authorization outcome unknown, intent left CREATED"
                );
                return Ok(CreatedIntent {
                    intent,
                    authorization_url: None,
                    access_code: None,
                });
            }
            Err(err) => {
                error!(
                    reference = %intent.reference,
                    error = %err,
                    "gateway rejected authorization, intent left CREATED"
                );
                return Err(err.into());
            }
        };

        let mutation = IntentMutation::none()
            .with_transaction_id(Some(authorization.gateway_transaction_id.clone()));
        let intent = match self
            .store
            .compare_and_swap_state(
                &intent.reference,
                IntentState::Created,
                IntentState::Authorizing,
                mutation,
            )
            .await
        {
            Ok(updated) => {
                self.emit(&updated);
                info!(reference = %updated.reference, "payment intent authorizing");
                updated
            }
            // A webhook or poll already moved it on
            Err(StoreError::StaleState { .. }) => self.store.get(&intent.reference).await?,
            Err(other) => return Err(other.into()),
        };

        Ok(CreatedIntent {
            intent,
            authorization_url: Some(authorization.authorization_url),
            access_code: authorization.access_code,
        })
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    fn check_amount(
        &self,
        intent: &PaymentIntent,
        update: &GatewayStatusUpdate,
    ) -> LifecycleResult<()> {
        let amount_matches = update
            .amount_minor_units
            .map_or(true, |amount| amount == intent.amount_minor_units);
        let currency_matches = update
            .currency
            .as_deref()
            .map_or(true, |currency| currency.eq_ignore_ascii_case(&intent.currency));

        if amount_matches && currency_matches {
            return Ok(());
        }

        let reported = format!(
            "{} {}",
            update
                .amount_minor_units
                .map(|a| a.to_string())
                .unwrap_or_else(|| "?".to_string()),
            update.currency.as_deref().unwrap_or("?")
        );
        let expected = format!("{} {}", intent.amount_minor_units, intent.currency);
        error!(
            reference = %intent.reference,
            expected = %expected,
            reported = %reported,
            event_id = %update.event_id,
            "gateway amount mismatch, status not applied"
        );
        Err(LifecycleError::AmountMismatch {
            reference: intent.reference.clone(),
            expected,
            reported,
        })
    }

    /// Apply a gateway-reported status to an intent, at most once per event id.
    pub async fn apply_gateway_status(
        &self,
        reference: &str,
        update: GatewayStatusUpdate,
    ) -> LifecycleResult<ApplyOutcome> {
        for _ in 0..MAX_CAS_ROUNDS {
            let intent = self.store.get(reference).await?;

            if intent.has_reconciled(&update.event_id) {
                debug!(reference, event_id = %update.event_id, "event already reconciled");
                return Ok(ApplyOutcome::Duplicate(intent));
            }

            if intent.state.is_terminal() {
                if update.status == GatewayStatus::Success && intent.state != IntentState::Succeeded
                {
                    warn!(
                        reference,
                        state = %intent.state,
                        event_id = %update.event_id,
                        "gateway reports success for an intent that is already {}",
                        intent.state
                    );
                }
                let intent = self.store.record_event_id(reference, &update.event_id).await?;
                return Ok(ApplyOutcome::AlreadyTerminal(intent));
            }

            let Some(target) = update.status.target_state() else {
                // Pending: only acknowledge a gateway transaction on a CREATED intent
                if intent.state != IntentState::Created || update.gateway_transaction_id.is_none()
                {
                    return Ok(ApplyOutcome::Pending(intent));
                }
                let mutation = IntentMutation::none()
                    .with_transaction_id(update.gateway_transaction_id.clone());
                match self
                    .store
                    .compare_and_swap_state(
                        reference,
                        IntentState::Created,
                        IntentState::Authorizing,
                        mutation,
                    )
                    .await
                {
                    Ok(updated) => {
                        self.emit(&updated);
                        return Ok(ApplyOutcome::Pending(updated));
                    }
                    Err(StoreError::StaleState { .. }) => continue,
                    Err(other) => return Err(other.into()),
                }
            };

            self.check_amount(&intent, &update)?;

            let mutation = IntentMutation::none()
                .with_transaction_id(update.gateway_transaction_id.clone())
                .with_event_id(update.event_id.clone());
            match self
                .store
                .compare_and_swap_state(reference, intent.state, target, mutation)
                .await
            {
                Ok(updated) => {
                    info!(
                        reference,
                        from = %intent.state,
                        to = %updated.state,
                        event_id = %update.event_id,
                        "payment intent transitioned"
                    );
                    self.emit(&updated);
                    return Ok(ApplyOutcome::Transitioned(updated));
                }
                Err(StoreError::StaleState { actual, .. }) => {
                    debug!(reference, actual = %actual, "lost state swap, reloading");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }

        // Unreachable in practice: the state can only advance twice.
        let intent = self.store.get(reference).await?;
        Ok(if intent.state.is_terminal() {
            ApplyOutcome::AlreadyTerminal(intent)
        } else {
            ApplyOutcome::Pending(intent)
        })
    }

    /// Client-triggered verification: ask the gateway and apply the answer.
    pub async fn poll_verify(&self, reference: &str) -> LifecycleResult<VerifyOutcome> {
        let intent = self.store.get(reference).await?;
        if intent.state.is_terminal() {
            return Ok(VerifyOutcome {
                intent,
                indeterminate: false,
            });
        }

        match self.call_gateway(self.gateway.verify(reference)).await {
            Ok(response) => {
                let update = GatewayStatusUpdate::from_verify(reference, response);
                let outcome = self.apply_gateway_status(reference, update).await?;
                debug!(reference, outcome = outcome.label(), "verification applied");
                Ok(VerifyOutcome {
                    intent: outcome.into_intent(),
                    indeterminate: false,
                })
            }
            Err(err) if err.is_indeterminate() => {
                warn!(reference, error = %err, "verification indeterminate, reporting pending");
                Ok(VerifyOutcome {
                    intent,
                    indeterminate: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------------

    async fn expire(&self, intent: &PaymentIntent) -> Result<PaymentIntent, StoreError> {
        let updated = self
            .store
            .compare_and_swap_state(
                &intent.reference,
                intent.state,
                IntentState::Expired,
                IntentMutation::none(),
            )
            .await?;
        info!(reference = %updated.reference, from = %intent.state, "payment intent expired");
        self.emit(&updated);
        Ok(updated)
    }

    /// Expire every open intent past its deadline as of `now`. Losing the swap
    /// to a concurrent success or failure is expected and counted as skipped.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> LifecycleResult<SweepReport> {
        let candidates = self.store.list_expired(now).await?;
        let mut report = SweepReport::default();

        for intent in candidates {
            match self.expire(&intent).await {
                Ok(_) => report.expired += 1,
                Err(StoreError::StaleState { .. }) | Err(StoreError::InvalidTransition { .. }) => {
                    report.skipped += 1
                }
                Err(err) => {
                    warn!(reference = %intent.reference, error = %err, "failed to expire intent");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Read an intent, expiring it first if it is open and past its deadline.
    pub async fn get_intent(&self, reference: &str) -> LifecycleResult<PaymentIntent> {
        self.get_intent_at(reference, Utc::now()).await
    }

    pub async fn get_intent_at(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> LifecycleResult<PaymentIntent> {
        let intent = self.store.get(reference).await?;
        if !intent.is_expired_at(now) {
            return Ok(intent);
        }

        match self.expire(&intent).await {
            Ok(updated) => Ok(updated),
            Err(StoreError::StaleState { .. }) => Ok(self.store.get(reference).await?),
            Err(other) => Err(other.into()),
        }
    }

    /// Open intents older than `older_than`, for background re-verification
    pub async fn list_stale(
        &self,
        older_than: chrono::Duration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> LifecycleResult<Vec<PaymentIntent>> {
        Ok(self.store.list_stale(now - older_than, now, limit).await?)
    }
}
