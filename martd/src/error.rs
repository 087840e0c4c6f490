//! Daemon error types.

use mart_accrual::AccrualError;
use mart_domain::DomainError;
use mart_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Accrual client error
    #[error("Accrual error: {0}")]
    Accrual(#[from] AccrualError),

    /// Authentication error
    #[error("Auth error: {0}")]
    Auth(#[from] crate::auth::AuthError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database startup failure (connect or migrate)
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error (listener bind, signal handling)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
