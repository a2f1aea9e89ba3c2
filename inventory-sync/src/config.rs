//! Client configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{SyncError, SyncResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use stock_ledger::{LedgerClient, DEFAULT_TIMEOUT_SECS};

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inventory API configuration
    pub api: ApiConfig,

    /// Submission behaviour
    pub sync: SyncConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Inventory API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL including the API prefix
    pub base_url: String,
    /// Bearer credential
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Submission configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Transport retries with the same operation id
    pub submit_retries: u32,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";
const DEFAULT_SUBMIT_RETRIES: u32 = 1;

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> SyncResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = env::var("INVENTORY_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .parse()?;
        let api = Self::load_api_config()?;
        let sync = SyncConfig {
            submit_retries: Self::load_number_env("INVENTORY_SUBMIT_RETRIES", DEFAULT_SUBMIT_RETRIES)?,
        };

        Ok(Self {
            api,
            sync,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://127.0.0.1:0/api".to_string(),
                token: None,
                timeout: Duration::from_secs(2),
            },
            sync: SyncConfig { submit_retries: 1 },
            environment: Environment::Test,
        }
    }

    /// Build a ledger client from these settings
    pub fn ledger_client(&self) -> LedgerClient {
        let client = LedgerClient::new(&self.api.base_url).with_timeout(self.api.timeout);
        match &self.api.token {
            Some(token) => client.with_bearer_token(token),
            None => client,
        }
    }

    fn load_api_config() -> SyncResult<ApiConfig> {
        let base_url =
            env::var("INVENTORY_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "Invalid INVENTORY_API_BASE_URL: {}. Expected an http(s) URL",
                base_url
            )));
        }

        let token = env::var("INVENTORY_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let timeout_secs =
            Self::load_number_env("INVENTORY_REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(SyncError::Config(
                "Invalid INVENTORY_REQUEST_TIMEOUT_SECS: must be at least 1".to_string(),
            ));
        }

        Ok(ApiConfig {
            base_url,
            token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn load_number_env<T: FromStr>(key: &str, default: T) -> SyncResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                token: None,
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            },
            sync: SyncConfig {
                submit_retries: DEFAULT_SUBMIT_RETRIES,
            },
            environment: Environment::Development,
        }
    }
}

impl FromStr for Environment {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(SyncError::Config(format!(
                "Invalid INVENTORY_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "http://127.0.0.1:8000/api");
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(config.sync.submit_retries, 1);
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert!(config.api.token.is_none());
        assert_eq!(config.environment, Environment::Test);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert!(matches!("staging".parse::<Environment>(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    fn test_ledger_client_uses_base_url() {
        let mut config = Config::default();
        config.api.base_url = "http://inventory.local/api/".to_string();
        config.api.token = Some("t".to_string());

        assert_eq!(config.ledger_client().base_url(), "http://inventory.local/api");
    }
}
