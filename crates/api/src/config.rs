//! Application configuration loaded from environment variables.

use std::time::Duration;

use fulfillment::coordinator::DEFAULT_PAYMENT_TIMEOUT;
use fulfillment::services::payment::DEFAULT_APPROVAL_RATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `PAYMENT_TIMEOUT_MS`: bound on one charge call (default: `5000`)
/// - `PAYMENT_APPROVAL_RATE`: approval probability of the simulated gateway (default: `0.9`)
/// - `DATABASE_URL`: Postgres event store; unset means in-memory
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub payment_timeout: Duration,
    pub payment_approval_rate: f64,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            payment_timeout: lookup("PAYMENT_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_timeout),
            payment_approval_rate: lookup("PAYMENT_APPROVAL_RATE")
                .and_then(|rate| rate.parse::<f64>().ok())
                .filter(|rate| (0.0..=1.0).contains(rate))
                .unwrap_or(defaults.payment_approval_rate),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            payment_timeout: DEFAULT_PAYMENT_TIMEOUT,
            payment_approval_rate: DEFAULT_APPROVAL_RATE,
            database_url: None,
        }
    }
}
