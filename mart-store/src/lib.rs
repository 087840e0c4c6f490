//! Mart Storage Layer
//!
//! Persistence for orders, balances, withdrawals, and users.
//!
//! # Architecture
//!
//! - **Ledger traits**: define the storage interface (ports)
//! - **In-memory store**: fast implementation for testing
//! - **PostgreSQL store**: production implementation (feature `postgres`)
//!
//! The order ledger and balance ledger are facets of the same transactional
//! store: the cross-ledger operations on [`Store`] (`create_processed`,
//! `finalize_with_credit`) commit both sides as a single atomic unit.

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{BalanceLedger, OrderLedger, Store, UserRepository};
