//! `/health` endpoints: intent store reachability plus gateway configuration.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::database::intent_store::IntentStore;
use crate::payments::gateway::PaymentGateway;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Serving, but some capability is missing (e.g. webhooks cannot be verified)
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Record one component and fold it into the overall state.
    pub fn record(&mut self, name: impl Into<String>, component: ComponentHealth) {
        let folded = match (&self.status, &component.status) {
            (HealthState::Unhealthy, _) | (_, ComponentState::Down) => HealthState::Unhealthy,
            (HealthState::Degraded, _) | (_, ComponentState::Warning) => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
        self.status = folded;
        self.checks.insert(name.into(), component);
    }

    pub fn is_healthy(&self) -> bool {
        self.status != HealthState::Unhealthy
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    fn with(status: ComponentState, response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status,
            response_time_ms,
            details,
        }
    }

    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self::with(ComponentState::Up, response_time_ms, None)
    }

    pub fn down(details: impl Into<String>) -> Self {
        Self::with(ComponentState::Down, None, Some(details.into()))
    }

    pub fn warning(details: impl Into<String>) -> Self {
        Self::with(ComponentState::Warning, None, Some(details.into()))
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn IntentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn IntentStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut report = HealthStatus::new();
        report.record(
            format!("store:{}", self.store.backend()),
            self.check_store().await,
        );
        report.record(
            format!("gateway:{}", self.gateway.name()),
            self.check_gateway(),
        );
        report
    }

    async fn check_store(&self) -> ComponentHealth {
        let started = Instant::now();
        match tokio::time::timeout(STORE_CHECK_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed().as_millis();
                debug!(backend = self.store.backend(), elapsed_ms = elapsed, "intent store ping ok");
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!(backend = self.store.backend(), error = %e, "intent store ping failed");
                ComponentHealth::down(e.to_string())
            }
            Err(_) => {
                error!(backend = self.store.backend(), "intent store ping timed out");
                ComponentHealth::down("Timeout")
            }
        }
    }

    /// Configuration only. Probing the gateway on every health call would
    /// spend its rate limit.
    fn check_gateway(&self) -> ComponentHealth {
        if self.gateway.webhook_secret_configured() {
            ComponentHealth::up(None)
        } else {
            warn!(gateway = self.gateway.name(), "webhook secret is not configured");
            ComponentHealth::warning("webhook secret not configured")
        }
    }
}

type HealthReply = Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)>;

/// GET /health
pub async fn health(State(checker): State<HealthChecker>) -> HealthReply {
    let report = checker.check_health().await;
    if report.is_healthy() {
        Ok(Json(report))
    } else {
        error!(status = ?report.status, "🏥 health check failed");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(report)))
    }
}

/// GET /health/ready
pub async fn readiness(state: State<HealthChecker>) -> HealthReply {
    health(state).await
}

/// GET /health/live
pub async fn liveness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_healthy() {
        let report = HealthStatus::new();
        assert_eq!(report.status, HealthState::Healthy);
        assert!(report.checks.is_empty());
    }

    #[test]
    fn warning_degrades_and_down_wins() {
        let mut report = HealthStatus::new();
        report.record("store:memory", ComponentHealth::up(Some(1)));
        assert_eq!(report.status, HealthState::Healthy);

        report.record("gateway:paystack", ComponentHealth::warning("no secret"));
        assert_eq!(report.status, HealthState::Degraded);
        assert!(report.is_healthy());

        report.record("store:postgres", ComponentHealth::down("refused"));
        assert_eq!(report.status, HealthState::Unhealthy);
        assert!(!report.is_healthy());

        report.record("extra", ComponentHealth::up(None));
        assert_eq!(report.status, HealthState::Unhealthy);
    }

    #[test]
    fn component_constructors() {
        let down = ComponentHealth::down("Test error");
        assert_eq!(down.status, ComponentState::Down);
        assert_eq!(down.details.as_deref(), Some("Test error"));
        assert_eq!(ComponentHealth::up(Some(100)).response_time_ms, Some(100));
    }
}
