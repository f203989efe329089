//! Application configuration loaded from environment variables.

use std::str::FromStr;

use common::Money;
use domain::PricingPolicy;
use rust_decimal::Decimal;
use saga::{CoordinatorConfig, QueueConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default `0.0.0.0`)
/// - `PORT`: listen port (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: Postgres URL; unset selects in-memory backends
/// - `TAX_RATE`: default `0.16`
/// - `SHIPPING_FEE`: default `25.00`
/// - `NOTIFICATION_MAX_ATTEMPTS`: default `3`
/// - `COMPENSATION_MAX_ATTEMPTS`: default `3`
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub tax_rate: Decimal,
    pub shipping_fee: Money,
    pub notification_max_attempts: u32,
    pub compensation_max_attempts: u32,
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
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            tax_rate: parse_var(&lookup, "TAX_RATE").unwrap_or(defaults.tax_rate),
            shipping_fee: parse_var::<Decimal>(&lookup, "SHIPPING_FEE")
                .map(Money::new)
                .unwrap_or(defaults.shipping_fee),
            notification_max_attempts: parse_var::<u32>(&lookup, "NOTIFICATION_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.notification_max_attempts),
            compensation_max_attempts: parse_var::<u32>(&lookup, "COMPENSATION_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.compensation_max_attempts),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy::new(self.tax_rate, self.shipping_fee)
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            max_attempts: self.notification_max_attempts,
            ..QueueConfig::default()
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            compensation_max_attempts: self.compensation_max_attempts,
            ..CoordinatorConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        let pricing = PricingPolicy::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            tax_rate: pricing.tax_rate,
            shipping_fee: pricing.shipping_fee,
            notification_max_attempts: 3,
            compensation_max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.tax_rate, Decimal::new(16, 2));
        assert_eq!(config.shipping_fee, Money::from_major(25));
        assert_eq!(config.compensation_max_attempts, 3);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_values_from_environment() {
        let config = config_from(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("TAX_RATE", "0.08"),
            ("SHIPPING_FEE", "10.50"),
            ("NOTIFICATION_MAX_ATTEMPTS", "5"),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(config.pricing().tax_rate, Decimal::new(8, 2));
        assert_eq!(config.pricing().shipping_fee, Money::from_minor(1050));
        assert_eq!(config.queue().max_attempts, 5);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("TAX_RATE", "sixteen"),
            ("COMPENSATION_MAX_ATTEMPTS", "0"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.tax_rate, Decimal::new(16, 2));
        assert_eq!(config.coordinator().compensation_max_attempts, 3);
        assert!(config.database_url.is_none());
    }
}
