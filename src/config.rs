//! Environment-driven configuration.
//!
//! Everything is read once at startup from the process environment (plus an
//! optional `.env`). `validate` runs before any listener or pool is opened.

use crate::payments::providers::PaystackConfig;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub payment: PaymentConfig,
    pub paystack: PaystackConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration. Without a URL the service runs on the in-memory store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment intent lifecycle settings
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub intent_ttl_secs: u64,
    pub supported_currencies: Vec<String>,
    pub channels: Vec<String>,
    pub callback_url: Option<String>,
    pub sweep_interval_secs: u64,
    pub monitor_enabled: bool,
    pub stale_verify_after_secs: u64,
    pub stale_batch_size: usize,
    pub max_metadata_entries: usize,
    pub max_metadata_bytes: usize,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            intent_ttl_secs: 1800,
            supported_currencies: ["NGN", "GHS", "ZAR", "USD"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            channels: [
                "card",
                "bank",
                "ussd",
                "bank_transfer",
                "mobile_money",
                "qr",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            callback_url: None,
            sweep_interval_secs: 60,
            monitor_enabled: true,
            stale_verify_after_secs: 300,
            stale_batch_size: 50,
            max_metadata_entries: 32,
            max_metadata_bytes: 4096,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is normal in containers
        dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payment: PaymentConfig::from_env()?,
            paystack: PaystackConfig::from_env()
                .map_err(|_| ConfigError::MissingVariable("PAYSTACK_SECRET_KEY".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.payment.validate()?;

        if !self.paystack.base_url.starts_with("http://")
            && !self.paystack.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "PAYSTACK_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.paystack.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYSTACK_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn parse_list(name: &str, default: &[String]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.to_vec(),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.host.is_empty(), self.port) {
            (true, _) => Err(ConfigError::InvalidValue("HOST is empty".to_string())),
            (_, 0) => Err(ConfigError::InvalidValue("PORT must be non-zero".to_string())),
            _ => Ok(()),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigError::InvalidValue(
                    "DATABASE_URL must start with postgres:// or postgresql://".to_string(),
                ));
            }
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS exceeds DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT") {
                Ok(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.level
            .parse::<tracing::Level>()
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidValue(format!("LOG_LEVEL '{}'", self.level)))
    }
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PaymentConfig::default();
        Ok(PaymentConfig {
            intent_ttl_secs: parse_var("PAYMENT_INTENT_TTL_SECS", "1800")?,
            supported_currencies: parse_list("SUPPORTED_CURRENCIES", &defaults.supported_currencies)
                .into_iter()
                .map(|c| c.to_uppercase())
                .collect(),
            channels: parse_list("PAYMENT_CHANNELS", &defaults.channels)
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
            callback_url: env::var("PAYMENT_CALLBACK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            sweep_interval_secs: parse_var("INTENT_SWEEP_INTERVAL_SECS", "60")?,
            monitor_enabled: parse_var("INTENT_MONITOR_ENABLED", "true")?,
            stale_verify_after_secs: parse_var("STALE_INTENT_VERIFY_AFTER_SECS", "300")?,
            stale_batch_size: parse_var("STALE_INTENT_BATCH_SIZE", "50")?,
            max_metadata_entries: parse_var("MAX_METADATA_ENTRIES", "32")?,
            max_metadata_bytes: parse_var("MAX_METADATA_BYTES", "4096")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intent_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_INTENT_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.supported_currencies.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "SUPPORTED_CURRENCIES must list at least one currency".to_string(),
            ));
        }

        if let Some(bad) = self
            .supported_currencies
            .iter()
            .find(|c| c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
        {
            return Err(ConfigError::InvalidValue(format!(
                "SUPPORTED_CURRENCIES contains invalid ISO 4217 code '{}'",
                bad
            )));
        }

        if let Some(url) = &self.callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(
                    "PAYMENT_CALLBACK_URL must be a valid URL".to_string(),
                ));
            }
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "INTENT_SWEEP_INTERVAL_SECS".to_string(),
            ));
        }

        if self.stale_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "STALE_INTENT_BATCH_SIZE".to_string(),
            ));
        }

        Ok(())
    }

    pub fn intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.intent_ttl_secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    MissingVariable(String),

    #[error("bad setting: {0}")]
    InvalidValue(String),

    #[error("configuration rejected: {0}")]
    ValidationFailed(String),
}
