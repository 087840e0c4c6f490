//! PostgreSQL store implementation.
//!
//! Production implementation of the ledger traits on top of a shared
//! `PgPool`. Cross-ledger operations run inside a single transaction; order
//! ownership relies on the unique constraint on `orders.number` and balance
//! debits on a conditional update, so no application-level locking is needed.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{BalanceLedger, OrderLedger, Store, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mart_domain::{Balance, Order, OrderStatus, User, Withdrawal};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

/// PostgreSQL-backed store.
pub struct PgStore {
    /// PostgreSQL connection pool
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Create a new PostgreSQL store.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Credit a user's balance inside an open transaction.
///
/// The balance row is created at registration, but upsert anyway so a credit
/// can never be lost to a missing row.
async fn credit_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: Decimal,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO balances (user_id, current, withdrawn)
        VALUES ($1, $2, 0)
        ON CONFLICT (user_id)
        DO UPDATE SET current = balances.current + EXCLUDED.current
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_order_row(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(StoreError::from)?;
    Ok(Order {
        number: row.try_get("number").map_err(StoreError::from)?,
        user_id: row.try_get("user_id").map_err(StoreError::from)?,
        status: status.parse::<OrderStatus>()?,
        accrual: row.try_get("accrual").map_err(StoreError::from)?,
        uploaded_at: row.try_get("uploaded_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl OrderLedger for PgStore {
    async fn find_owner(&self, number: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM orders WHERE number = $1")
            .bind(number)
            .fetch_optional(&*self.pool)
            .await?;

        row.map(|r| r.try_get::<i64, _>("user_id").map_err(StoreError::from))
            .transpose()
    }

    async fn create(
        &self,
        number: &str,
        user_id: i64,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(number)
        .bind(user_id)
        .bind(status.as_str())
        .bind(accrual)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn claim_pending_batch(&self) -> Result<Vec<String>, StoreError> {
        // Single statement: concurrent reconciliation runs cannot double-claim.
        let rows = sqlx::query(
            r#"
            WITH claimed AS (
                UPDATE orders
                SET status = 'PROCESSING'
                WHERE status IN ('NEW', 'PROCESSING')
                RETURNING number, uploaded_at
            )
            SELECT number FROM claimed ORDER BY uploaded_at ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("number").map_err(StoreError::from))
            .collect()
    }

    async fn finalize(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET status = $2, accrual = $3 WHERE number = $1")
            .bind(number)
            .bind(status.as_str())
            .bind(accrual)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_user(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(parse_order_row).collect()
    }
}

#[async_trait]
impl BalanceLedger for PgStore {
    async fn get(&self, user_id: i64) -> Result<Balance, StoreError> {
        let row = sqlx::query("SELECT current, withdrawn FROM balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => Ok(Balance {
                current: row.try_get("current").map_err(StoreError::from)?,
                withdrawn: row.try_get("withdrawn").map_err(StoreError::from)?,
            }),
            None => Ok(Balance::zero()),
        }
    }

    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        sum: Decimal,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Conditional debit: the WHERE clause guarantees the balance can
        // never go negative, even under concurrent debits.
        let result = sqlx::query(
            r#"
            UPDATE balances
            SET current = current - $2, withdrawn = withdrawn + $2
            WHERE user_id = $1 AND current >= $2
            "#,
        )
        .bind(user_id)
        .bind(sum)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::InsufficientFunds { user_id });
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, user_id, order_number, sum, processed_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(order_number)
        .bind(sum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, order_number, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Withdrawal {
                    user_id: row.try_get("user_id").map_err(StoreError::from)?,
                    order_number: row.try_get("order_number").map_err(StoreError::from)?,
                    sum: row.try_get("sum").map_err(StoreError::from)?,
                    processed_at: row
                        .try_get::<DateTime<Utc>, _>("processed_at")
                        .map_err(StoreError::from)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, login: &str, password_hash: &str) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO users (login, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await?;
        let user_id: i64 = row.try_get("id").map_err(StoreError::from)?;

        // Balance row exists from the moment of registration.
        sqlx::query("INSERT INTO balances (user_id, current, withdrawn) VALUES ($1, 0, 0)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, login, password_hash FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&*self.pool)
            .await?;

        row.map(|row| {
            Ok(User {
                id: row.try_get("id").map_err(StoreError::from)?,
                login: row.try_get("login").map_err(StoreError::from)?,
                password_hash: row.try_get("password_hash").map_err(StoreError::from)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl Store for PgStore {
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
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, 'PROCESSED', $3, NOW())
            "#,
        )
        .bind(number)
        .bind(user_id)
        .bind(accrual)
        .execute(&mut *tx)
        .await?;

        credit_in_tx(&mut tx, user_id, accrual).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_with_credit(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // The status guard makes a replayed finalize a no-op: an order that
        // already reached PROCESSED was credited in the same transaction
        // that finalized it.
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1 AND status <> 'PROCESSED'
            RETURNING user_id
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Guard matched nothing: either a replayed finalize (already
            // PROCESSED, nothing to do) or an unknown number.
            let exists = sqlx::query("SELECT 1 FROM orders WHERE number = $1")
                .bind(number)
                .fetch_optional(&mut *tx)
                .await?;
            tx.commit().await?;
            return if exists.is_some() {
                Ok(())
            } else {
                Err(StoreError::not_found("order", number))
            };
        };

        let user_id: i64 = row.try_get("user_id").map_err(StoreError::from)?;
        if status == OrderStatus::Processed {
            if let Some(amount) = accrual {
                if amount > Decimal::ZERO {
                    credit_in_tx(&mut tx, user_id, amount).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
