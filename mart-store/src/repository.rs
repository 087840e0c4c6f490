//! Ledger trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL or in-memory for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use mart_domain::{Balance, Order, OrderStatus, User, Withdrawal};
use rust_decimal::Decimal;

/// Ledger of submitted orders.
///
/// Ownership is first-writer-wins, enforced by the store's uniqueness
/// constraint on the order number, not by application-level locking.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Look up the current owner of an order number. No side effects.
    async fn find_owner(&self, number: &str) -> Result<Option<i64>, StoreError>;

    /// Insert a new order row.
    ///
    /// Fails with `StoreError::Duplicate` when the number already exists;
    /// callers treat that as "someone already owns it" and re-check the
    /// owner rather than surfacing an error.
    async fn create(
        &self,
        number: &str,
        user_id: i64,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError>;

    /// Atomically transition every NEW/PROCESSING order to PROCESSING and
    /// return their numbers.
    ///
    /// Must be a single atomic statement so concurrent reconciliation runs
    /// cannot double-claim.
    async fn claim_pending_batch(&self) -> Result<Vec<String>, StoreError>;

    /// Update status/accrual for one order.
    async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError>;

    /// All orders submitted by a user, newest first.
    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError>;
}

/// Ledger of user balances and withdrawals.
///
/// Credits are not exposed here: they happen only inside the atomic
/// cross-ledger operations on [`Store`], in the same transaction as the
/// order transition that triggered them.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance and total withdrawn. A missing row reads as zeros.
    async fn get(&self, user_id: i64) -> Result<Balance, StoreError>;

    /// Checked debit plus withdrawal record, in one transaction.
    ///
    /// Uses a conditional update so concurrent debits can never leave a
    /// negative balance. Fails with `StoreError::InsufficientFunds` when the
    /// sum exceeds the current balance at commit time.
    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), StoreError>;

    /// All withdrawals for a user, oldest first.
    async fn withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError>;
}

/// Repository for registered users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and their zero balance row in one transaction.
    ///
    /// Returns the assigned user id, or `StoreError::Duplicate` when the
    /// login is taken.
    async fn create(&self, login: &str, password_hash: &str) -> Result<i64, StoreError>;

    /// Find a user by login.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;
}

/// Combined store interface.
///
/// The cross-ledger operations are defined here because they must span the
/// order ledger and balance ledger in one transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get the order ledger
    fn orders(&self) -> &dyn OrderLedger;

    /// Get the balance ledger
    fn balances(&self) -> &dyn BalanceLedger;

    /// Get the user repository
    fn users(&self) -> &dyn UserRepository;

    /// Insert a PROCESSED order and credit its owner atomically.
    ///
    /// Used by the submission fast path when the oracle already has final
    /// data. Propagates `StoreError::Duplicate` on a number conflict.
    async fn create_processed(
        &self,
        number: &str,
        user_id: i64,
        accrual: Decimal,
    ) -> Result<(), StoreError>;

    /// Finalize an order and, when the final status is PROCESSED with a
    /// positive accrual, credit the owner's balance in the same transaction.
    ///
    /// Both writes commit or roll back together. An order that is already
    /// PROCESSED is left untouched so a replayed finalize can never
    /// double-credit. An unknown number fails with `StoreError::NotFound`.
    async fn finalize_with_credit(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError>;
}
