use crate::database::error::DatabaseError;
use crate::payments::types::{IntentMutation, IntentState, PaymentIntent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("payment intent with reference '{0}' already exists")]
    DuplicateReference(String),

    #[error("payment intent '{0}' not found")]
    NotFound(String),

    /// The compare-and-swap lost: the row is no longer in the expected state
    #[error("payment intent '{reference}' is {actual}, expected {expected}")]
    StaleState {
        reference: String,
        expected: IntentState,
        actual: IntentState,
    },

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition { from: IntentState, to: IntentState },

    #[error("intent store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures the caller may retry (or ask the gateway to redeliver)
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_unique_violation() {
            return StoreError::DuplicateReference(err.context.clone().unwrap_or_default());
        }
        if err.is_not_found() {
            return StoreError::NotFound(err.context.clone().unwrap_or_default());
        }
        StoreError::Unavailable(err.to_string())
    }
}

/// Durable record of payment intents.
///
/// `compare_and_swap_state` is the only way to change `state` and must be a
/// single atomic conditional update per reference.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Fails with `DuplicateReference` if the reference already exists.
    async fn insert(&self, intent: &PaymentIntent) -> StoreResult<()>;

    async fn get(&self, reference: &str) -> StoreResult<PaymentIntent>;

    /// Move `reference` from `expected` to `new`, applying `mutation` in the
    /// same update. Returns the updated intent, or `StaleState` when the
    /// stored state is no longer `expected`.
    async fn compare_and_swap_state(
        &self,
        reference: &str,
        expected: IntentState,
        new: IntentState,
        mutation: IntentMutation,
    ) -> StoreResult<PaymentIntent>;

    /// Add `event_id` to the dedup ledger without touching `state`.
    /// Already-present ids are left as they are.
    async fn record_event_id(&self, reference: &str, event_id: &str)
        -> StoreResult<PaymentIntent>;

    /// Intents in CREATED or AUTHORIZING with `expires_at <= before`
    async fn list_expired(&self, before: DateTime<Utc>) -> StoreResult<Vec<PaymentIntent>>;

    /// Non-terminal, not yet expired intents created before `created_before`,
    /// oldest first.
    async fn list_stale(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<PaymentIntent>>;

    async fn ping(&self) -> StoreResult<()>;

    fn backend(&self) -> &'static str;
}

/// Applies `mutation` to `intent`. A transaction id in the mutation replaces
/// the stored one; event ids are only ever added.
pub(crate) fn apply_mutation(intent: &mut PaymentIntent, mutation: IntentMutation) {
    if let Some(id) = mutation.gateway_transaction_id {
        intent.gateway_transaction_id = Some(id);
    }
    if let Some(event_id) = mutation.reconciled_event_id {
        intent.reconciled_event_ids.insert(event_id);
    }
}

/// Process-local store for tests and single-instance deployments without
/// Postgres.
#[derive(Default)]
pub struct MemoryIntentStore {
    intents: RwLock<HashMap<String, PaymentIntent>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.intents.read().await.len()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert(&self, intent: &PaymentIntent) -> StoreResult<()> {
        let mut intents = self.intents.write().await;
        if intents.contains_key(&intent.reference) {
            return Err(StoreError::DuplicateReference(intent.reference.clone()));
        }
        intents.insert(intent.reference.clone(), intent.clone());
        Ok(())
    }

    async fn get(&self, reference: &str) -> StoreResult<PaymentIntent> {
        self.intents
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))
    }

    async fn compare_and_swap_state(
        &self,
        reference: &str,
        expected: IntentState,
        new: IntentState,
        mutation: IntentMutation,
    ) -> StoreResult<PaymentIntent> {
        if !expected.can_transition_to(new) {
            return Err(StoreError::InvalidTransition {
                from: expected,
                to: new,
            });
        }

        let mut intents = self.intents.write().await;
        let intent = intents
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if intent.state != expected {
            return Err(StoreError::StaleState {
                reference: reference.to_string(),
                expected,
                actual: intent.state,
            });
        }

        intent.state = new;
        apply_mutation(intent, mutation);
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }

    async fn record_event_id(
        &self,
        reference: &str,
        event_id: &str,
    ) -> StoreResult<PaymentIntent> {
        let mut intents = self.intents.write().await;
        let intent = intents
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if intent.reconciled_event_ids.insert(event_id.to_string()) {
            intent.updated_at = Utc::now();
        }
        Ok(intent.clone())
    }

    async fn list_expired(&self, before: DateTime<Utc>) -> StoreResult<Vec<PaymentIntent>> {
        let mut expired: Vec<PaymentIntent> = self
            .intents
            .read()
            .await
            .values()
            .filter(|intent| intent.is_expired_at(before))
            .cloned()
            .collect();
        expired.sort_by_key(|intent| intent.expires_at);
        Ok(expired)
    }

    async fn list_stale(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<PaymentIntent>> {
        let mut stale: Vec<PaymentIntent> = self
            .intents
            .read()
            .await
            .values()
            .filter(|intent| {
                !intent.state.is_terminal()
                    && intent.created_at < created_before
                    && intent.expires_at > now
            })
            .cloned()
            .collect();
        stale.sort_by_key(|intent| intent.created_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{Metadata, NewIntent};
    use chrono::Duration;
    use std::sync::Arc;

    fn intent(reference: &str, now: DateTime<Utc>) -> PaymentIntent {
        PaymentIntent::new(
            reference.to_string(),
            NewIntent {
                amount_minor_units: 50_000,
                currency: "NGN".to_string(),
                payer_email: "fan@example.com".to_string(),
                metadata: Metadata::new(),
            },
            Duration::minutes(30),
            now,
        )
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_reference() {
        let store = MemoryIntentStore::new();
        let now = Utc::now();
        store.insert(&intent("TKT-1", now)).await.unwrap();
        let err = store.insert(&intent("TKT-1", now)).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateReference("TKT-1".to_string()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_reference_is_not_found() {
        let store = MemoryIntentStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cas_applies_state_and_mutation() {
        let store = MemoryIntentStore::new();
        store.insert(&intent("TKT-2", Utc::now())).await.unwrap();

        let updated = store
            .compare_and_swap_state(
                "TKT-2",
                IntentState::Created,
                IntentState::Authorizing,
                IntentMutation::none().with_transaction_id(Some("ac_1".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, IntentState::Authorizing);
        assert_eq!(updated.gateway_transaction_id.as_deref(), Some("ac_1"));

        let stale = store
            .compare_and_swap_state(
                "TKT-2",
                IntentState::Created,
                IntentState::Expired,
                IntentMutation::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            stale,
            StoreError::StaleState {
                actual: IntentState::Authorizing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cas_refuses_to_leave_terminal_state() {
        let store = MemoryIntentStore::new();
        store.insert(&intent("TKT-3", Utc::now())).await.unwrap();
        store
            .compare_and_swap_state(
                "TKT-3",
                IntentState::Created,
                IntentState::Succeeded,
                IntentMutation::none().with_event_id("evt-1"),
            )
            .await
            .unwrap();

        let err = store
            .compare_and_swap_state(
                "TKT-3",
                IntentState::Succeeded,
                IntentState::Failed,
                IntentMutation::none(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(
            store.get("TKT-3").await.unwrap().state,
            IntentState::Succeeded
        );
    }

    #[tokio::test]
    async fn concurrent_cas_has_exactly_one_winner() {
        let store = Arc::new(MemoryIntentStore::new());
        store.insert(&intent("TKT-4", Utc::now())).await.unwrap();

        let attempts = (0..16).map(|i| {
            let store = store.clone();
            let target = if i % 2 == 0 {
                IntentState::Succeeded
            } else {
                IntentState::Failed
            };
            async move {
                store
                    .compare_and_swap_state(
                        "TKT-4",
                        IntentState::Created,
                        target,
                        IntentMutation::none().with_event_id(format!("evt-{}", i)),
                    )
                    .await
            }
        });
        let results = futures::future::join_all(attempts).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let stored = store.get("TKT-4").await.unwrap();
        assert!(stored.state.is_terminal());
        assert_eq!(stored.reconciled_event_ids.len(), 1);
    }

    #[tokio::test]
    async fn record_event_id_is_idempotent() {
        let store = MemoryIntentStore::new();
        store.insert(&intent("TKT-5", Utc::now())).await.unwrap();
        store.record_event_id("TKT-5", "evt-1").await.unwrap();
        let again = store.record_event_id("TKT-5", "evt-1").await.unwrap();
        assert_eq!(again.reconciled_event_ids.len(), 1);
        assert!(again.has_reconciled("evt-1"));
    }

    #[tokio::test]
    async fn list_expired_only_returns_open_intents_past_deadline() {
        let store = MemoryIntentStore::new();
        let t0 = Utc::now();
        store.insert(&intent("TKT-open", t0)).await.unwrap();
        store.insert(&intent("TKT-done", t0)).await.unwrap();
        store
            .compare_and_swap_state(
                "TKT-done",
                IntentState::Created,
                IntentState::Succeeded,
                IntentMutation::none(),
            )
            .await
            .unwrap();

        assert!(store
            .list_expired(t0 + Duration::minutes(30) - Duration::milliseconds(1))
            .await
            .unwrap()
            .is_empty());
        let expired = store
            .list_expired(t0 + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reference, "TKT-open");
    }

    #[tokio::test]
    async fn list_stale_skips_expired_and_respects_limit() {
        let store = MemoryIntentStore::new();
        let t0 = Utc::now() - Duration::minutes(10);
        for i in 0..3 {
            store
                .insert(&intent(&format!("TKT-s{}", i), t0 + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let now = t0 + Duration::minutes(10);
        let stale = store
            .list_stale(now - Duration::minutes(5), now, 2)
            .await
            .unwrap();
        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].reference, "TKT-s0");

        let after_expiry = t0 + Duration::minutes(45);
        assert!(store
            .list_stale(after_expiry, after_expiry, 10)
            .await
            .unwrap()
            .is_empty());
    }
}
