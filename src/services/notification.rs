use crate::payments::types::IntentEvent;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Downstream consumer of intent lifecycle events.
///
/// Ticket issuance and payer notifications hang off these events; for now
/// they are logged in a structured format.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub fn handle_event(&self, event: &IntentEvent) {
        match event {
            IntentEvent::Authorizing {
                reference,
                gateway_transaction_id,
            } => {
                info!(
                    reference = %reference,
                    gateway_transaction_id = ?gateway_transaction_id,
                    "🔔 NOTIFICATION: Awaiting payer authorization"
                );
            }
            IntentEvent::Succeeded {
                reference,
                amount_minor_units,
                currency,
                payer_email,
                metadata,
            } => {
                info!(
                    reference = %reference,
                    amount_minor_units,
                    currency = %currency,
                    event = ?metadata.get("event_id"),
                    "🔔 NOTIFICATION: Payment succeeded - issue tickets"
                );
                debug!(reference = %reference, payer = %payer_email, "ticket recipient");
            }
            IntentEvent::Failed {
                reference,
                payer_email,
            } => {
                error!(reference = %reference, "🔔 NOTIFICATION: Payment failed");
                debug!(reference = %reference, payer = %payer_email, "failure recipient");
            }
            IntentEvent::Expired { reference } => {
                info!(reference = %reference, "🔔 NOTIFICATION: Payment intent expired");
            }
        }
    }

    /// Consume events until the channel closes or shutdown is signalled.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<IntentEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("🔔 Notification service started");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Notification service shutting down");
                            break;
                        }
                    }
                    received = events.recv() => match received {
                        Ok(event) => self.handle_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notification service lagged behind intent events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}
