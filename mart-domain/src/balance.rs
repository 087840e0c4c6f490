//! Balance and withdrawal records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's reward balance.
///
/// # Invariants
/// - `current` never goes negative
/// - `withdrawn` is monotonically non-decreasing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Sum of credited accruals minus withdrawals
    pub current: Decimal,
    /// Running total of all withdrawals
    pub withdrawn: Decimal,
}

impl Balance {
    /// A zero balance, as created at registration.
    pub fn zero() -> Self {
        Self {
            current: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        }
    }
}

/// A committed withdrawal. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// User the points were debited from
    pub user_id: i64,
    /// Order number the withdrawal is attributed to.
    /// Not required to exist in the order ledger.
    pub order_number: String,
    /// Debited amount
    pub sum: Decimal,
    /// Commit timestamp
    pub processed_at: DateTime<Utc>,
}
