use crate::payments::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    /// Recorded locally, gateway has not acknowledged the attempt yet
    Created,
    /// Gateway returned an authorization URL, waiting on the payer
    Authorizing,
    Succeeded,
    Failed,
    Expired,
}

impl IntentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentState::Created => "CREATED",
            IntentState::Authorizing => "AUTHORIZING",
            IntentState::Succeeded => "SUCCEEDED",
            IntentState::Failed => "FAILED",
            IntentState::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentState::Succeeded | IntentState::Failed | IntentState::Expired
        )
    }

    /// All states reachable in one step from this state
    pub fn valid_transitions(&self) -> &'static [IntentState] {
        match self {
            // CREATED may skip AUTHORIZING when authorization was indeterminate
            IntentState::Created => &[
                IntentState::Authorizing,
                IntentState::Succeeded,
                IntentState::Failed,
                IntentState::Expired,
            ],
            IntentState::Authorizing => &[
                IntentState::Succeeded,
                IntentState::Failed,
                IntentState::Expired,
            ],
            IntentState::Succeeded | IntentState::Failed | IntentState::Expired => &[],
        }
    }

    pub fn can_transition_to(&self, target: IntentState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for IntentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentState {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "CREATED" => Ok(IntentState::Created),
            "AUTHORIZING" => Ok(IntentState::Authorizing),
            "SUCCEEDED" => Ok(IntentState::Succeeded),
            "FAILED" => Ok(IntentState::Failed),
            "EXPIRED" => Ok(IntentState::Expired),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown intent state: {}", value),
                field: Some("state".to_string()),
            }),
        }
    }
}

/// Status reported by the gateway for a reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "success",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Pending => "pending",
        }
    }

    /// Terminal intent state this status resolves to, if any
    pub fn target_state(&self) -> Option<IntentState> {
        match self {
            GatewayStatus::Success => Some(IntentState::Succeeded),
            GatewayStatus::Failed => Some(IntentState::Failed),
            GatewayStatus::Pending => None,
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn executable_content_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(<\s*/?\s*script|javascript\s*:)").expect("static regex")
    })
}

/// Caller supplied key/value pairs, kept in insertion order and passed
/// through to the gateway untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(Vec<(String, JsonValue)>);

impl Metadata {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs(pairs: Vec<(String, JsonValue)>) -> Self {
        Self(pairs)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.0.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, JsonValue)> {
        self.0.iter()
    }

    pub fn into_pairs(self) -> Vec<(String, JsonValue)> {
        self.0
    }

    /// Edge validation: entry count, serialized size, duplicate keys and
    /// anything that looks like markup or script.
    pub fn validate(&self, max_entries: usize, max_bytes: usize) -> Result<(), PaymentError> {
        if self.0.len() > max_entries {
            return Err(PaymentError::ValidationError {
                message: format!("metadata may contain at most {} entries", max_entries),
                field: Some("metadata".to_string()),
            });
        }

        let encoded = serde_json::to_vec(self).map_err(|e| PaymentError::ValidationError {
            message: format!("metadata is not serializable: {}", e),
            field: Some("metadata".to_string()),
        })?;
        if encoded.len() > max_bytes {
            return Err(PaymentError::ValidationError {
                message: format!("metadata may not exceed {} bytes", max_bytes),
                field: Some("metadata".to_string()),
            });
        }

        let mut seen = BTreeSet::new();
        for (key, value) in &self.0 {
            if key.trim().is_empty() {
                return Err(PaymentError::ValidationError {
                    message: "metadata keys must not be empty".to_string(),
                    field: Some("metadata".to_string()),
                });
            }
            if !seen.insert(key.as_str()) {
                return Err(PaymentError::ValidationError {
                    message: format!("duplicate metadata key: {}", key),
                    field: Some(format!("metadata.{}", key)),
                });
            }
            if executable_content_pattern().is_match(key) || contains_executable(value) {
                return Err(PaymentError::ValidationError {
                    message: format!("metadata entry '{}' contains executable content", key),
                    field: Some(format!("metadata.{}", key)),
                });
            }
        }
        Ok(())
    }
}

fn contains_executable(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(s) => executable_content_pattern().is_match(s),
        JsonValue::Array(items) => items.iter().any(contains_executable),
        JsonValue::Object(map) => map
            .iter()
            .any(|(k, v)| executable_content_pattern().is_match(k) || contains_executable(v)),
        _ => false,
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = Metadata;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object of metadata entries")
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(Metadata::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, JsonValue>()? {
                    pairs.push((key, value));
                }
                Ok(Metadata(pairs))
            }
        }

        deserializer.deserialize_any(MetadataVisitor)
    }
}

/// Validated purchase request used to create an intent.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub amount_minor_units: i64,
    pub currency: String,
    pub payer_email: String,
    pub metadata: Metadata,
}

/// A single attempted payment, from creation through terminal resolution.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub reference: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub payer_email: String,
    pub metadata: Metadata,
    pub state: IntentState,
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub reconciled_event_ids: BTreeSet<String>,
}

impl PaymentIntent {
    pub fn new(reference: String, request: NewIntent, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            reference,
            amount_minor_units: request.amount_minor_units,
            currency: request.currency,
            payer_email: request.payer_email,
            metadata: request.metadata,
            state: IntentState::Created,
            gateway_transaction_id: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            reconciled_event_ids: BTreeSet::new(),
        }
    }

    pub fn has_reconciled(&self, event_id: &str) -> bool {
        self.reconciled_event_ids.contains(event_id)
    }

    /// Whether the intent is still open and at or past its deadline
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && self.expires_at <= now
    }
}

/// Fields a compare-and-swap may change besides `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentMutation {
    pub gateway_transaction_id: Option<String>,
    pub reconciled_event_id: Option<String>,
}

impl IntentMutation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_transaction_id(mut self, id: Option<String>) -> Self {
        self.gateway_transaction_id = id;
        self
    }

    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.reconciled_event_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    pub callback_url: Option<String>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorization_url: String,
    pub gateway_transaction_id: String,
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub status: GatewayStatus,
    pub amount_minor_units: i64,
    pub currency: String,
    pub gateway_transaction_id: Option<String>,
    /// Gateway-assigned event id, when the verify endpoint exposes one
    pub event_id: Option<String>,
    pub gateway_response: Option<String>,
    pub paid_at: Option<String>,
}

/// A webhook delivery after signature validation and parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub event_type: String,
    pub event_id: String,
    pub reference: Option<String>,
    pub status: Option<GatewayStatus>,
    pub amount_minor_units: Option<i64>,
    pub currency: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

/// Domain events emitted once per committed transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentEvent {
    Authorizing {
        reference: String,
        gateway_transaction_id: Option<String>,
    },
    Succeeded {
        reference: String,
        amount_minor_units: i64,
        currency: String,
        payer_email: String,
        metadata: Metadata,
    },
    Failed {
        reference: String,
        payer_email: String,
    },
    Expired {
        reference: String,
    },
}

impl IntentEvent {
    pub fn reference(&self) -> &str {
        match self {
            IntentEvent::Authorizing { reference, .. }
            | IntentEvent::Succeeded { reference, .. }
            | IntentEvent::Failed { reference, .. }
            | IntentEvent::Expired { reference } => reference,
        }
    }

    pub fn for_transition(intent: &PaymentIntent) -> Self {
        match intent.state {
            IntentState::Authorizing | IntentState::Created => IntentEvent::Authorizing {
                reference: intent.reference.clone(),
                gateway_transaction_id: intent.gateway_transaction_id.clone(),
            },
            IntentState::Succeeded => IntentEvent::Succeeded {
                reference: intent.reference.clone(),
                amount_minor_units: intent.amount_minor_units,
                currency: intent.currency.clone(),
                payer_email: intent.payer_email.clone(),
                metadata: intent.metadata.clone(),
            },
            IntentState::Failed => IntentEvent::Failed {
                reference: intent.reference.clone(),
                payer_email: intent.payer_email.clone(),
            },
            IntentState::Expired => IntentEvent::Expired {
                reference: intent.reference.clone(),
            },
        }
    }
}
