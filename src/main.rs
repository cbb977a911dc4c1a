use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ticketpay_backend::build_router;
use ticketpay_backend::config::AppConfig;
use ticketpay_backend::database::{IntentStore, MemoryIntentStore};
use ticketpay_backend::logging::init_tracing;
use ticketpay_backend::payments::{PaymentGateway, PaystackGateway};
use ticketpay_backend::services::{IntentLifecycleManager, LifecycleConfig, NotificationService};
use ticketpay_backend::workers::intent_monitor::{IntentMonitorConfig, IntentMonitorWorker};

const BACKGROUND_DRAIN: Duration = Duration::from_secs(5);

const ROUTES: &[(&str, &str, &str)] = &[
    ("POST", "/payment/initialize", "create a payment intent"),
    ("POST", "/payment/verify", "verify with the gateway"),
    ("GET", "/payment/callback", "gateway redirect target"),
    ("GET", "/payment/intents/{reference}", "intent status"),
    ("POST", "/payment/webhook", "gateway webhooks"),
    ("GET", "/payment/methods", "payment channels"),
    ("GET", "/payment/currencies", "supported currencies"),
    ("GET", "/payment/verify-config", "gateway configuration"),
    ("GET", "/health", "health check"),
];

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 shutdown requested, draining connections");
}

async fn shutdown_and_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn init_store(config: &AppConfig) -> anyhow::Result<Arc<dyn IntentStore>> {
    use ticketpay_backend::database::{init_pool_from_config, PaymentIntentRepository};

    if config.database.url.is_none() {
        warn!("⚠️  DATABASE_URL not set, using in-memory intent store (state is lost on restart)");
        return Ok(Arc::new(MemoryIntentStore::new()));
    }

    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!(error = %e, "📊 intent database unavailable");
        e
    })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "📊 intent store backed by Postgres"
    );
    Ok(Arc::new(PaymentIntentRepository::new(pool)))
}

#[cfg(not(feature = "database"))]
async fn init_store(_config: &AppConfig) -> anyhow::Result<Arc<dyn IntentStore>> {
    warn!("⚠️  Built without the database feature, using in-memory intent store");
    Ok(Arc::new(MemoryIntentStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting TicketPay backend service"
    );

    let store = init_store(&config).await?;

    let gateway: Arc<dyn PaymentGateway> = Arc::new(PaystackGateway::new(config.paystack.clone())?);
    info!(
        base_url = %config.paystack.base_url,
        webhook_secret_configured = gateway.webhook_secret_configured(),
        "✅ Paystack gateway initialized"
    );

    // Bounds a whole gateway call including client retries
    let gateway_timeout = Duration::from_secs(
        config
            .paystack
            .timeout_secs
            .saturating_mul(u64::from(config.paystack.max_retries) + 1),
    );
    let lifecycle = Arc::new(IntentLifecycleManager::new(
        store,
        gateway,
        LifecycleConfig::from_payment_config(&config.payment, gateway_timeout),
    ));

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let notification_handle =
        NotificationService::new().spawn(lifecycle.subscribe(), worker_shutdown_rx.clone());

    let monitor_handle = if config.payment.monitor_enabled {
        let worker = IntentMonitorWorker::new(
            lifecycle.clone(),
            IntentMonitorConfig::from_payment_config(&config.payment),
        );
        let rx = worker_shutdown_rx.clone();
        info!("✅ Payment intent monitor worker started");
        Some(tokio::spawn(async move { worker.run(rx).await }))
    } else {
        info!("⏭️  Payment intent monitor disabled (INTENT_MONITOR_ENABLED=false)");
        None
    };

    let app = build_router(lifecycle);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "❌ could not bind listener");
        e
    })?;

    for (method, path, purpose) in ROUTES {
        info!("📡 {:<5} {:<28} {}", method, path, purpose);
    }
    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_and_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    let background = monitor_handle
        .into_iter()
        .map(|handle| ("intent monitor", handle))
        .chain(std::iter::once(("notifications", notification_handle)));
    for (name, handle) in background {
        if tokio::time::timeout(BACKGROUND_DRAIN, handle).await.is_err() {
            error!(task = name, "background task did not stop in time");
        }
    }

    info!("👋 TicketPay backend stopped");

    Ok(())
}
