//! Environment configuration

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::value_objects::TaxRate;
use crate::engine::retry::RetryConfig;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Settings the coordinator runs with.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Applied to every new order
    pub tax_rate: TaxRate,
    pub retry: RetryConfig,
    /// Upper bound on a single unit of work, waiting for the store included
    pub unit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { tax_rate: TaxRate::default(), retry: RetryConfig::default(), unit_timeout: Duration::from_millis(5000) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub nats_url: Option<String>,
    pub engine: EngineConfig,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let port = parse_or(&get, "PORT", 8083)?;
        let db_max_connections = parse_or(&get, "DB_MAX_CONNECTIONS", 10)?;
        let nats_url = get("NATS_URL");

        let tax: Decimal = parse_or(&get, "ORDER_TAX_RATE", Decimal::new(1, 1))?;
        let tax_rate = TaxRate::new(tax).map_err(|_| invalid("ORDER_TAX_RATE", tax.to_string()))?;
        let max_attempts: u32 = parse_or(&get, "ORDER_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("ORDER_MAX_ATTEMPTS", "0".into()));
        }
        let timeout_ms: u64 = parse_or(&get, "ORDER_UNIT_TIMEOUT_MS", 5000)?;

        Ok(Self {
            database_url,
            port,
            db_max_connections,
            nats_url,
            engine: EngineConfig {
                tax_rate,
                retry: RetryConfig { max_attempts, ..RetryConfig::default() },
                unit_timeout: Duration::from_millis(timeout_ms),
            },
        })
    }
}

fn invalid(key: &'static str, value: String) -> ConfigError {
    ConfigError::Invalid { key, value }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| invalid(key, raw)),
        None => Ok(default),
    }
}
