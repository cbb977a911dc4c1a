//! Postgres connection pool and schema migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error as log_error, info, warn};

use super::error::{DatabaseError, DatabaseErrorKind};
use crate::config::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        let defaults = PoolConfig::default();
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: config
                .idle_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            max_lifetime: defaults.max_lifetime,
        }
    }
}

/// Open a pool; `None` uses [`PoolConfig::default`].
pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, DatabaseError> {
    let config = config.unwrap_or_default();
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.connection_timeout.as_secs(),
        "Opening Postgres pool"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .map_err(|e| {
            log_error!(error = %e, "Could not open Postgres pool");
            DatabaseError::from_sqlx(e)
        })
}

/// Open the configured pool and bring the `payment_intents` schema up to date.
pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    let url = config.url.as_deref().ok_or_else(|| {
        DatabaseError::new(DatabaseErrorKind::ConfigError {
            message: "DATABASE_URL is not set".to_string(),
        })
    })?;

    let pool = init_pool(url, Some(PoolConfig::from(config))).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            log_error!(error = %e, "Migrations failed");
            DatabaseError::from_sqlx(e.into())
        })?;
    info!("Database migrations applied");
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
        warn!(error = %e, "Postgres ping failed");
        DatabaseError::from_sqlx(e)
    })?;
    Ok(())
}
