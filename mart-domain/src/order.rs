//! Order entity and status lifecycle.
//!
//! An order number is owned by exactly one user for its entire lifetime.
//! Status transitions: NEW -> PROCESSING -> INVALID | PROCESSED. The accrual
//! amount is present only once the order reaches PROCESSED.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::number::DomainError;

/// Processing status of a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted, not yet picked up by the reconciliation loop
    New,
    /// Claimed by the reconciliation loop, awaiting oracle data
    Processing,
    /// Oracle rejected the order; no reward
    Invalid,
    /// Oracle computed a final reward; balance credited
    Processed,
}

impl OrderStatus {
    /// Whether this status is terminal (no further reconciliation).
    pub fn is_final(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Database/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Luhn-valid order number, globally unique
    pub number: String,
    /// User who first submitted the number; immutable
    pub user_id: i64,
    /// Current processing status
    pub status: OrderStatus,
    /// Reward amount, present only when status is PROCESSED
    pub accrual: Option<Decimal>,
    /// Submission timestamp, immutable
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in the given status.
    pub fn new(number: String, user_id: i64, status: OrderStatus, accrual: Option<Decimal>) -> Self {
        Self {
            number,
            user_id,
            status,
            accrual,
            uploaded_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_unknown_string() {
        assert!(matches!(
            "DONE".parse::<OrderStatus>(),
            Err(DomainError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_status_finality() {
        assert!(!OrderStatus::New.is_final());
        assert!(!OrderStatus::Processing.is_final());
        assert!(OrderStatus::Invalid.is_final());
        assert!(OrderStatus::Processed.is_final());
    }

    #[test]
    fn test_status_serde_uppercase() {
        let json = serde_json::to_string(&OrderStatus::Processed).unwrap();
        assert_eq!(json, r#""PROCESSED""#);
    }

    #[test]
    fn test_order_creation() {
        let order = Order::new("12345678903".to_string(), 7, OrderStatus::Processed, Some(dec!(500)));
        assert_eq!(order.user_id, 7);
        assert_eq!(order.accrual, Some(dec!(500)));
        assert!(order.status.is_final());
    }
}
