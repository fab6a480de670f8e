//! Configuration for Recoup

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Retry engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Payment execution client configuration
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Exchange rate source configuration
    #[serde(default)]
    pub rates: RatesConfig,

    /// Outbound email configuration
    #[serde(default)]
    pub email: EmailConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Run migrations at startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

/// Retry engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between worker ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum campaigns processed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// How far back the failure monitors look for failed events, in hours
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,

    /// How long a claimed campaign stays hidden from other engine instances
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: i64,

    /// Run the failure monitors on each tick
    #[serde(default = "default_true")]
    pub monitors_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            lookback_hours: default_lookback_hours(),
            claim_lease_secs: default_claim_lease(),
            monitors_enabled: true,
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    50
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_claim_lease() -> i64 {
    600
}

/// Payment execution client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Endpoint that executes payment requests
    #[serde(default = "default_payment_endpoint")]
    pub endpoint: String,

    /// Bearer token for the payment endpoint
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,

    /// Currency payments settle in; other currencies are quoted through the rate source
    #[serde(default = "default_settlement_currency")]
    pub settlement_currency: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            endpoint: default_payment_endpoint(),
            api_key: None,
            timeout_secs: default_payment_timeout(),
            settlement_currency: default_settlement_currency(),
        }
    }
}

fn default_payment_endpoint() -> String {
    "http://localhost:8545/payments".to_string()
}

fn default_payment_timeout() -> u64 {
    30
}

fn default_settlement_currency() -> String {
    "USD".to_string()
}

/// Exchange rate source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    /// Endpoint returning exchange rates
    #[serde(default = "default_rates_endpoint")]
    pub endpoint: String,

    /// How long a fetched rate is reused, in seconds
    #[serde(default = "default_rates_ttl")]
    pub ttl_secs: i64,

    /// Request timeout in seconds
    #[serde(default = "default_rates_timeout")]
    pub timeout_secs: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rates_endpoint(),
            ttl_secs: default_rates_ttl(),
            timeout_secs: default_rates_timeout(),
        }
    }
}

fn default_rates_endpoint() -> String {
    "http://localhost:8090/rates".to_string()
}

fn default_rates_ttl() -> i64 {
    300
}

fn default_rates_timeout() -> u64 {
    10
}

/// Outbound email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// SMTP username
    pub username: Option<String>,

    /// SMTP password
    pub password: Option<String>,

    /// Use implicit TLS
    #[serde(default)]
    pub use_tls: bool,

    /// Use STARTTLS
    #[serde(default = "default_true")]
    pub use_starttls: bool,

    /// Sender address for dunning emails
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Sender display name
    pub from_name: Option<String>,

    /// Base URL customers use to update their payment method
    #[serde(default = "default_billing_portal_url")]
    pub billing_portal_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            use_tls: false,
            use_starttls: true,
            from_address: default_from_address(),
            from_name: None,
            billing_portal_url: default_billing_portal_url(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "billing@localhost".to_string()
}

fn default_billing_portal_url() -> String {
    "http://localhost:3000/billing".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `RECOUP_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var("RECOUP_CONFIG") {
            return Self::from_file(std::path::Path::new(&path));
        }

        let paths = [
            std::path::PathBuf::from("./recoup.toml"),
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/recoup/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    fn validate(&self) -> crate::Result<()> {
        if self.engine.batch_size <= 0 {
            return Err(crate::Error::Config(
                "engine.batch_size must be positive".to_string(),
            ));
        }
        if self.engine.poll_interval_secs == 0 {
            return Err(crate::Error::Config(
                "engine.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.rates.ttl_secs < 0 {
            return Err(crate::Error::Config(
                "rates.ttl_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let engine = EngineConfig::default();
        assert_eq!(engine.batch_size, 50);
        assert_eq!(engine.lookback_hours, 24);

        let payment = PaymentConfig::default();
        assert_eq!(payment.settlement_currency, "USD");
        assert_eq!(payment.timeout_secs, 30);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/recoup"

[engine]
batch_size = 25
poll_interval_secs = 30

[payment]
endpoint = "https://payments.internal/execute"
settlement_currency = "USDC"

[email]
host = "smtp.example.com"
from_address = "billing@example.com"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/recoup");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.engine.batch_size, 25);
        assert_eq!(config.engine.claim_lease_secs, 600);
        assert_eq!(config.payment.settlement_currency, "USDC");
        assert_eq!(config.email.port, 587);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_rejects_invalid_engine_settings() {
        let toml = r#"
[database]
url = "postgres://localhost/recoup"

[engine]
batch_size = 0
"#;
        assert!(matches!(
            Config::from_toml(toml),
            Err(crate::Error::Config(_))
        ));
    }
}
