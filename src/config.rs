//! Environment-based Configuration for the Custodia Backend
//!
//! All sensitive values (API keys, webhook secrets) MUST come from
//! environment variables, never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Runtime Environment
//! - `CUSTODIA_ENV` - "production", "staging", or "development" (default: "development")
//! - `CUSTODIA_API_PORT` - REST API port (default: 3001)
//! - `CUSTODIA_DATABASE_PATH` - SQLite database file (default: "data/custodia.db")
//!
//! ## Chain API Configuration
//! - `CUSTODIA_ETHEREUM_API` - Etherscan-compatible API endpoint
//! - `CUSTODIA_ETHEREUM_API_KEY` - API key for the Ethereum endpoint
//! - `CUSTODIA_BITCOIN_API` - Esplora-compatible API endpoint
//! - `CUSTODIA_CHAIN_TIMEOUT_SECS` - Per-request timeout (default: 10)
//!
//! ## Secrets (required outside development)
//! - `CUSTODIA_WEBHOOK_API_KEY` - Shared secret for the blockchain webhook
//! - `CUSTODIA_ADMIN_API_KEY` - Shared secret for monitoring endpoints
//!
//! ## Reconciliation Policy
//! - `CUSTODIA_ETH_CONFIRMATIONS` - Account-model threshold (default: 12)
//! - `CUSTODIA_BTC_CONFIRMATIONS` - UTXO-model threshold (default: 3)
//! - `CUSTODIA_SCAN_INTERVAL_SECS` - Scanner tick interval (default: 300)
//! - `CUSTODIA_SCAN_BATCH_SIZE` - Addresses per scan batch (default: 5)
//! - `CUSTODIA_SCAN_BATCH_DELAY_MS` - Pause between batches (default: 1000)
//! - `CUSTODIA_PENDING_DEPOSIT_TTL_SECS` - Expire stale pending crypto
//!   deposits after this many seconds; unset = keep indefinitely
//!
//! ## Optional Settings
//! - `CUSTODIA_LOG_LEVEL` - Logging level (debug, info, warn, error)

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" | "stage" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            _ => Err(ConfigError::InvalidValue(
                "CUSTODIA_ENV".to_string(),
                format!("unknown environment: {}", s),
            )),
        }
    }
}

impl Environment {
    /// Get default Esplora-compatible API for this environment
    pub fn default_bitcoin_api(&self) -> &'static str {
        match self {
            Environment::Production => "https://blockstream.info/api",
            Environment::Staging | Environment::Development => {
                "https://blockstream.info/testnet/api"
            }
        }
    }

    /// Get default Etherscan-compatible API for this environment
    pub fn default_ethereum_api(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.etherscan.io/api",
            Environment::Staging | Environment::Development => {
                "https://api-sepolia.etherscan.io/api"
            }
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Runtime environment
    pub env: Environment,

    /// REST API port
    pub api_port: u16,

    /// SQLite database path
    pub database_path: String,

    /// Etherscan-compatible API endpoint
    pub ethereum_api_url: String,

    /// API key for the Ethereum endpoint
    pub ethereum_api_key: String,

    /// Esplora-compatible API endpoint
    pub bitcoin_api_url: String,

    /// Per-request chain API timeout in seconds
    pub chain_timeout_secs: u64,

    /// Shared secret for the blockchain webhook (x-api-key)
    pub webhook_api_key: String,

    /// Shared secret for monitoring endpoints (x-admin-key)
    pub admin_api_key: String,

    /// Minimum confirmations for account-model networks
    pub account_confirmations: u64,

    /// Minimum confirmations for UTXO-model networks
    pub utxo_confirmations: u32,

    /// Scanner tick interval in seconds
    pub scan_interval_secs: u64,

    /// Addresses processed per scan batch
    pub scan_batch_size: usize,

    /// Pause between scan batches in milliseconds
    pub scan_batch_delay_ms: u64,

    /// Expiry for stale pending crypto deposits; None keeps them forever
    pub pending_deposit_ttl_secs: Option<u64>,

    /// Log level
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let env: Environment = env::var("CUSTODIA_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .parse()?;

        let api_port = parse_env("CUSTODIA_API_PORT", 3001u16)?;

        let database_path = env::var("CUSTODIA_DATABASE_PATH")
            .unwrap_or_else(|_| "data/custodia.db".to_string());

        let ethereum_api_url = env::var("CUSTODIA_ETHEREUM_API")
            .unwrap_or_else(|_| env.default_ethereum_api().to_string());
        let ethereum_api_key = env::var("CUSTODIA_ETHEREUM_API_KEY").unwrap_or_default();

        let bitcoin_api_url = env::var("CUSTODIA_BITCOIN_API")
            .unwrap_or_else(|_| env.default_bitcoin_api().to_string());

        let chain_timeout_secs = parse_env("CUSTODIA_CHAIN_TIMEOUT_SECS", 10u64)?;

        let webhook_api_key =
            get_required_or_dev_default("CUSTODIA_WEBHOOK_API_KEY", "dev-webhook-key", env)?;
        let admin_api_key =
            get_required_or_dev_default("CUSTODIA_ADMIN_API_KEY", "dev-admin-key", env)?;

        let account_confirmations = parse_env("CUSTODIA_ETH_CONFIRMATIONS", 12u64)?;
        let utxo_confirmations = parse_env("CUSTODIA_BTC_CONFIRMATIONS", 3u32)?;

        let scan_interval_secs = parse_env("CUSTODIA_SCAN_INTERVAL_SECS", 300u64)?;
        let scan_batch_size = parse_env("CUSTODIA_SCAN_BATCH_SIZE", 5usize)?;
        let scan_batch_delay_ms = parse_env("CUSTODIA_SCAN_BATCH_DELAY_MS", 1000u64)?;

        let pending_deposit_ttl_secs = match env::var("CUSTODIA_PENDING_DEPOSIT_TTL_SECS") {
            Ok(v) => Some(v.parse().map_err(|_| {
                ConfigError::InvalidValue(
                    "CUSTODIA_PENDING_DEPOSIT_TTL_SECS".to_string(),
                    "must be a number of seconds".to_string(),
                )
            })?),
            Err(_) => None,
        };

        let log_level = env::var("CUSTODIA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            env,
            api_port,
            database_path,
            ethereum_api_url,
            ethereum_api_key,
            bitcoin_api_url,
            chain_timeout_secs,
            webhook_api_key,
            admin_api_key,
            account_confirmations,
            utxo_confirmations,
            scan_interval_secs,
            scan_batch_size,
            scan_batch_delay_ms,
            pending_deposit_ttl_secs,
            log_level,
        })
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.webhook_api_key == "dev-webhook-key" || self.webhook_api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar(
                "CUSTODIA_WEBHOOK_API_KEY".to_string(),
            ));
        }
        if self.admin_api_key == "dev-admin-key" || self.admin_api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar(
                "CUSTODIA_ADMIN_API_KEY".to_string(),
            ));
        }
        Ok(())
    }

    /// Log configuration summary (hiding sensitive values)
    pub fn log_summary(&self) {
        tracing::info!(
            target: "custodia::config",
            env = ?self.env,
            api_port = self.api_port,
            database = %self.database_path,
            ethereum_api = %self.ethereum_api_url,
            bitcoin_api = %self.bitcoin_api_url,
            eth_confirmations = self.account_confirmations,
            btc_confirmations = self.utxo_confirmations,
            scan_interval_secs = self.scan_interval_secs,
            scan_batch_size = self.scan_batch_size,
            pending_ttl_secs = ?self.pending_deposit_ttl_secs,
            "configuration loaded"
        );
    }
}

/// Parse an env var with a default, erroring on unparseable values
fn parse_env<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(v) => v.parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("could not parse '{}'", v))
        }),
        Err(_) => Ok(default),
    }
}

/// Get required env var, or use default for development only
fn get_required_or_dev_default(
    var_name: &str,
    dev_default: &str,
    env: Environment,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if env == Environment::Development {
                Ok(dev_default.to_string())
            } else {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            "production".parse::<Environment>(),
            Ok(Environment::Production)
        ));
        assert!(matches!(
            "staging".parse::<Environment>(),
            Ok(Environment::Staging)
        ));
        assert!(matches!(
            "dev".parse::<Environment>(),
            Ok(Environment::Development)
        ));
        assert!("invalid".parse::<Environment>().is_err());
    }

    #[test]
    fn test_default_endpoints() {
        assert!(Environment::Production
            .default_bitcoin_api()
            .starts_with("https://blockstream.info/api"));
        assert!(Environment::Development
            .default_ethereum_api()
            .contains("sepolia"));
    }

    #[test]
    fn test_dev_default_secrets() {
        let key = get_required_or_dev_default(
            "CUSTODIA_TEST_UNSET_VAR",
            "fallback",
            Environment::Development,
        )
        .unwrap();
        assert_eq!(key, "fallback");

        let err = get_required_or_dev_default(
            "CUSTODIA_TEST_UNSET_VAR",
            "fallback",
            Environment::Production,
        );
        assert!(matches!(err, Err(ConfigError::MissingEnvVar(_))));
    }
}
