//! Mart Daemon Library
//!
//! Runtime orchestrator for the loyalty-points accounting service.
//!
//! # Architecture
//!
//! ```text
//! HTTP API ──▶ Submission Handler ──▶ Order Ledger ──▶ Balance Ledger
//!                     │                     ▲
//!                     ▼                     │
//!               Accrual Client ◀── Reconciliation Loop (background)
//! ```
//!
//! # Components
//!
//! - **Daemon**: main runtime orchestrator with graceful shutdown
//! - **Submission Handler**: synchronous path for one incoming order number
//! - **Reconciler**: background loop that retries pending orders against the
//!   accrual oracle and credits balances atomically
//! - **API**: HTTP endpoints (register/login/orders/balance/withdrawals)
//! - **Auth**: JWT session tokens and password hashing
//! - **Config**: environment-based configuration

#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod config;
pub mod daemon;
pub mod error;
pub mod reconciler;
pub mod submission;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use config::{AuthConfig, Config, ReconcilerConfig, ServerConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use reconciler::Reconciler;
