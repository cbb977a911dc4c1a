use crate::config::PaymentConfig;
use crate::services::intent_lifecycle::{IntentLifecycleManager, LifecycleError, SweepReport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Custom error type
// ---------------------------------------------------------------------------

/// Errors that abort a whole monitor cycle. Per-intent failures are only
/// logged.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("expiry sweep failed: {0}")]
    Sweep(#[source] LifecycleError),

    #[error("stale intent lookup failed: {0}")]
    StaleLookup(#[source] LifecycleError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IntentMonitorConfig {
    /// How often the worker wakes up.
    pub poll_interval: Duration,
    /// Open intents older than this are re-verified with the gateway.
    pub stale_after: chrono::Duration,
    /// Maximum number of stale intents verified per cycle.
    pub batch_size: usize,
}

impl Default for IntentMonitorConfig {
    fn default() -> Self {
        Self::from_payment_config(&PaymentConfig::default())
    }
}

impl IntentMonitorConfig {
    pub fn from_payment_config(config: &PaymentConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            stale_after: chrono::Duration::seconds(
                i64::try_from(config.stale_verify_after_secs).unwrap_or(i64::MAX / 1000),
            ),
            batch_size: config.stale_batch_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sweep: SweepReport,
    pub verified: usize,
    pub resolved: usize,
    pub verify_errors: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Expires overdue intents and re-verifies intents whose webhook never came.
pub struct IntentMonitorWorker {
    lifecycle: Arc<IntentLifecycleManager>,
    config: IntentMonitorConfig,
}

impl IntentMonitorWorker {
    pub fn new(lifecycle: Arc<IntentLifecycleManager>, config: IntentMonitorConfig) -> Self {
        Self { lifecycle, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.num_seconds(),
            batch_size = self.config.batch_size,
            "payment intent monitor worker started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("payment intent monitor worker stopping");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "intent monitor cycle failed");
                    }
                }
            }
        }

        info!("payment intent monitor worker stopped");
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let now = Utc::now();
        let mut report = CycleReport {
            sweep: self
                .lifecycle
                .sweep_expired(now)
                .await
                .map_err(MonitorError::Sweep)?,
            ..CycleReport::default()
        };

        if report.sweep.expired > 0 || report.sweep.errors > 0 {
            info!(
                expired = report.sweep.expired,
                skipped = report.sweep.skipped,
                errors = report.sweep.errors,
                "expiry sweep complete"
            );
        }

        let stale = self
            .lifecycle
            .list_stale(self.config.stale_after, now, self.config.batch_size)
            .await
            .map_err(MonitorError::StaleLookup)?;

        for intent in stale {
            report.verified += 1;
            match self.lifecycle.poll_verify(&intent.reference).await {
                Ok(outcome) if outcome.intent.state.is_terminal() => {
                    report.resolved += 1;
                    info!(
                        reference = %intent.reference,
                        state = %outcome.intent.state,
                        "stale intent resolved by verification"
                    );
                }
                Ok(outcome) => {
                    debug!(
                        reference = %intent.reference,
                        indeterminate = outcome.indeterminate,
                        "stale intent still open"
                    );
                }
                Err(e) => {
                    report.verify_errors += 1;
                    warn!(reference = %intent.reference, error = %e, "stale intent verification failed");
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_payment_settings() {
        let payment = PaymentConfig {
            sweep_interval_secs: 0,
            stale_verify_after_secs: 120,
            stale_batch_size: 7,
            ..PaymentConfig::default()
        };
        let config = IntentMonitorConfig::from_payment_config(&payment);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.stale_after, chrono::Duration::seconds(120));
        assert_eq!(config.batch_size, 7);
    }
}
