//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use coin_ledger_core::SignatureScheme;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// A `max/window_seconds` throttling rule as written in the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSetting {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitSetting {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    fn parse(var: &str, raw: &str) -> Result<Self, ConfigError> {
        let invalid = || {
            ConfigError::InvalidValue(
                var.to_string(),
                format!("'{}' is not in max/window_seconds form", raw),
            )
        };
        let (max, window) = raw.split_once('/').ok_or_else(invalid)?;
        let max_requests = max.trim().parse::<u32>().map_err(|_| invalid())?;
        let window_secs = window.trim().parse::<u64>().map_err(|_| invalid())?;
        if max_requests == 0 || window_secs == 0 {
            return Err(invalid());
        }
        Ok(Self::new(max_requests, window_secs))
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub cors_origin: String,
    /// Shared secret of the payment gateway. The service still starts without
    /// it, but the webhook answers with a configuration error.
    pub payment_api_key: Option<String>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub signup_rate_limit: RateLimitSetting,
    pub purchase_rate_limit: RateLimitSetting,
    pub topup_rate_limit: RateLimitSetting,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS".to_string(), e.to_string())
            })?,
            None => 5,
        };

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Payment Gateway Settings ---
        let payment_api_key = lookup("PAYMENT_API_KEY")
            .or_else(|| lookup("PAYMENT_PASSWORD"))
            .filter(|key| !key.trim().is_empty());

        let signature_schemes = match lookup("PAYMENT_SIGNATURE_SCHEMES") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<SignatureScheme>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConfigError::InvalidValue("PAYMENT_SIGNATURE_SCHEMES".to_string(), e))?,
            None => SignatureScheme::ALL.to_vec(),
        };
        if signature_schemes.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_SIGNATURE_SCHEMES".to_string(),
                "at least one scheme is required".to_string(),
            ));
        }

        // --- Load Rate Limits ---
        let rate_limit = |var: &str, default: RateLimitSetting| match lookup(var) {
            Some(raw) => RateLimitSetting::parse(var, &raw),
            None => Ok(default),
        };
        let signup_rate_limit = rate_limit("SIGNUP_RATE_LIMIT", RateLimitSetting::new(5, 15 * 60))?;
        let purchase_rate_limit = rate_limit("PURCHASE_RATE_LIMIT", RateLimitSetting::new(30, 60))?;
        let topup_rate_limit = rate_limit("TOPUP_RATE_LIMIT", RateLimitSetting::new(10, 60))?;

        Ok(Self {
            bind_address,
            database_url,
            database_max_connections,
            log_level,
            cors_origin,
            payment_api_key,
            signature_schemes,
            signup_rate_limit,
            purchase_rate_limit,
            topup_rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/coins")]).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.payment_api_key, None);
        assert_eq!(config.signature_schemes, SignatureScheme::ALL.to_vec());
        assert_eq!(config.signup_rate_limit, RateLimitSetting::new(5, 900));
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn payment_password_is_a_fallback_for_the_api_key() {
        let config = load(&[("DATABASE_URL", "x"), ("PAYMENT_PASSWORD", "pw")]).unwrap();
        assert_eq!(config.payment_api_key.as_deref(), Some("pw"));

        let config = load(&[
            ("DATABASE_URL", "x"),
            ("PAYMENT_API_KEY", "key"),
            ("PAYMENT_PASSWORD", "pw"),
        ])
        .unwrap();
        assert_eq!(config.payment_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn signature_schemes_can_be_narrowed() {
        let config = load(&[
            ("DATABASE_URL", "x"),
            ("PAYMENT_SIGNATURE_SCHEMES", "data_colon_secret"),
        ])
        .unwrap();
        assert_eq!(config.signature_schemes, vec![SignatureScheme::DataColonSecret]);

        assert!(load(&[("DATABASE_URL", "x"), ("PAYMENT_SIGNATURE_SCHEMES", "sha1")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("PAYMENT_SIGNATURE_SCHEMES", " , ")]).is_err());
    }

    #[test]
    fn rate_limits_parse_max_and_window() {
        let config = load(&[("DATABASE_URL", "x"), ("PURCHASE_RATE_LIMIT", "3/10")]).unwrap();
        assert_eq!(config.purchase_rate_limit, RateLimitSetting::new(3, 10));
        assert!(load(&[("DATABASE_URL", "x"), ("PURCHASE_RATE_LIMIT", "3")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("PURCHASE_RATE_LIMIT", "0/10")]).is_err());
    }
}
