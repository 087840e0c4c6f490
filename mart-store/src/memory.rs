//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! A single mutex stands in for the database transaction boundary: every
//! operation, including the cross-ledger ones, runs under it, which gives
//! the same atomicity the PostgreSQL store gets from transactions.

use crate::error::StoreError;
use crate::repository::{BalanceLedger, OrderLedger, Store, UserRepository};
use async_trait::async_trait;
use chrono::Utc;
use mart_domain::{Balance, Order, OrderStatus, User, Withdrawal};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory store for testing
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    orders: HashMap<String, Order>,
    balances: HashMap<i64, Balance>,
    withdrawals: Vec<Withdrawal>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.inner.lock().unwrap().orders.len()
    }

    /// Get the number of withdrawal records
    pub fn withdrawal_count(&self) -> usize {
        self.inner.lock().unwrap().withdrawals.len()
    }

    /// Fetch a full order row (test inspection helper)
    pub fn order(&self, number: &str) -> Option<Order> {
        self.inner.lock().unwrap().orders.get(number).cloned()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.users.clear();
        inner.orders.clear();
        inner.balances.clear();
        inner.withdrawals.clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn credit(&mut self, user_id: i64, amount: Decimal) {
        let balance = self.balances.entry(user_id).or_insert_with(Balance::zero);
        balance.current += amount;
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn find_owner(&self, number: &str) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.orders.get(number).map(|o| o.user_id))
    }

    async fn create(
        &self,
        number: &str,
        user_id: i64,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.contains_key(number) {
            return Err(StoreError::duplicate("order", number));
        }
        inner.orders.insert(
            number.to_string(),
            Order::new(number.to_string(), user_id, status, accrual),
        );
        Ok(())
    }

    async fn claim_pending_batch(&self) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let mut claimed: Vec<(chrono::DateTime<Utc>, String)> = Vec::new();
        for order in inner.orders.values_mut() {
            if matches!(order.status, OrderStatus::New | OrderStatus::Processing) {
                order.status = OrderStatus::Processing;
                claimed.push((order.uploaded_at, order.number.clone()));
            }
        }

        claimed.sort();
        Ok(claimed.into_iter().map(|(_, number)| number).collect())
    }

    async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(number)
            .ok_or_else(|| StoreError::not_found("order", number))?;
        order.status = status;
        order.accrual = accrual;
        Ok(())
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }
}

#[async_trait]
impl BalanceLedger for MemoryStore {
    async fn get(&self, user_id: i64) -> Result<Balance, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.balances.get(&user_id).copied().unwrap_or_else(Balance::zero))
    }

    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let balance = inner.balances.entry(user_id).or_insert_with(Balance::zero);
        if balance.current < sum {
            return Err(StoreError::InsufficientFunds { user_id });
        }
        balance.current -= sum;
        balance.withdrawn += sum;

        inner.withdrawals.push(Withdrawal {
            user_id,
            order_number: order_number.to_string(),
            sum,
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, login: &str, password_hash: &str) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.login == login) {
            return Err(StoreError::duplicate("user", login));
        }
        let id = inner.users.len() as i64 + 1;
        inner.users.push(User {
            id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        });
        inner.balances.insert(id, Balance::zero());
        Ok(id)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.login == login).cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn orders(&self) -> &dyn OrderLedger {
        self
    }

    fn balances(&self) -> &dyn BalanceLedger {
        self
    }

    fn users(&self) -> &dyn UserRepository {
        self
    }

    async fn create_processed(
        &self,
        number: &str,
        user_id: i64,
        accrual: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.contains_key(number) {
            return Err(StoreError::duplicate("order", number));
        }
        inner.orders.insert(
            number.to_string(),
            Order::new(
                number.to_string(),
                user_id,
                OrderStatus::Processed,
                Some(accrual),
            ),
        );
        inner.credit(user_id, accrual);
        Ok(())
    }

    async fn finalize_with_credit(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let user_id = {
            let order = inner
                .orders
                .get_mut(number)
                .ok_or_else(|| StoreError::not_found("order", number))?;
            if order.status == OrderStatus::Processed {
                // Already finalized and credited; replay must not double-credit.
                return Ok(());
            }
            order.status = status;
            order.accrual = accrual;
            order.user_id
        };

        if status == OrderStatus::Processed {
            if let Some(amount) = accrual {
                if amount > Decimal::ZERO {
                    inner.credit(user_id, amount);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
