//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `RUN_ADDRESS`, `DATABASE_URI`, and `ACCRUAL_SYSTEM_ADDRESS` are the
//! service's conventional names; daemon-specific knobs live under the
//! `MART_` prefix.

use crate::error::{DaemonError, DaemonResult};
use std::env;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub server: ServerConfig,

    /// Postgres DSN
    pub database_uri: String,

    /// Accrual oracle address (`host:port` or full URL)
    pub accrual_address: String,

    /// Session token configuration
    pub auth: AuthConfig,

    /// Reconciliation loop configuration
    pub reconciler: ReconcilerConfig,

    /// How long shutdown waits for in-flight work
    pub shutdown_grace: Duration,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (`host:port`)
    pub address: String,
}

/// Session token configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for signing session tokens
    pub token_secret: String,
    /// Token lifetime
    pub token_ttl: Duration,
}

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Base polling interval between passes
    pub poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let address = env::var("RUN_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let database_uri = env::var("DATABASE_URI")
            .map_err(|_| DaemonError::Config("DATABASE_URI is required".to_string()))?;

        let accrual_address = env::var("ACCRUAL_SYSTEM_ADDRESS").map_err(|_| {
            DaemonError::Config("ACCRUAL_SYSTEM_ADDRESS is required".to_string())
        })?;

        let token_secret = env::var("MART_TOKEN_SECRET")
            .map_err(|_| DaemonError::Config("MART_TOKEN_SECRET is required".to_string()))?;

        let token_ttl_hours = Self::load_u64_env("MART_TOKEN_TTL_HOURS", 3)?;
        let poll_interval_ms = Self::load_u64_env("MART_POLL_INTERVAL_MS", 1000)?;
        let shutdown_grace_secs = Self::load_u64_env("MART_SHUTDOWN_GRACE_SECS", 10)?;

        Ok(Self {
            server: ServerConfig { address },
            database_uri,
            accrual_address,
            auth: AuthConfig {
                token_secret,
                token_ttl: Duration::from_secs(token_ttl_hours * 3600),
            },
            reconciler: ReconcilerConfig {
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            server: ServerConfig {
                address: "127.0.0.1:0".to_string(), // Let OS assign port
            },
            database_uri: String::new(),
            accrual_address: "127.0.0.1:0".to_string(),
            auth: AuthConfig {
                token_secret: "test-secret".to_string(),
                token_ttl: Duration::from_secs(3600),
            },
            reconciler: ReconcilerConfig {
                poll_interval: Duration::from_millis(20),
            },
            shutdown_grace: Duration::from_secs(1),
        }
    }

    fn load_u64_env(key: &str, default: u64) -> DaemonResult<u64> {
        match env::var(key) {
            Ok(val) => val
                .parse::<u64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
