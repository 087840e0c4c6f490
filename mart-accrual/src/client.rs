//! Accrual oracle REST client.
//!
//! Queries the external accrual service for per-order reward data:
//!
//! `GET /api/orders/{number}` ->
//! - 200 + `{order, status, accrual}` JSON
//! - 204 / 404: the oracle has no record yet
//! - 429: rate limited (Retry-After header)
//! - 5xx: temporarily unavailable
//!
//! Rate limiting and "no data yet" are modeled as lookup outcomes, not
//! errors: the reconciliation loop reacts to them with backoff or a retry on
//! the next pass, and neither is ever surfaced to a submitting user as a
//! failure.

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use mart_domain::OrderStatus;

// =============================================================================
// Constants
// =============================================================================

/// Request timeout in seconds.
///
/// Bounds a single oracle call so one slow lookup cannot block unrelated
/// orders for the whole polling interval.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Backoff applied on 429 when the oracle omits Retry-After.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the accrual client.
#[derive(Debug, Clone, Error)]
pub enum AccrualError {
    /// Transport failure, timeout, or 5xx from the oracle; retry later
    #[error("Accrual service unavailable: {0}")]
    Unavailable(String),

    /// Malformed response or unexpected status code; logged, order stays pending
    #[error("Unexpected accrual response: {0}")]
    Unexpected(String),
}

// =============================================================================
// Oracle types
// =============================================================================

/// Order status as reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    /// Registered, reward not computed yet
    Registered,
    /// Reward computation in progress
    Processing,
    /// Order rejected, no reward
    Invalid,
    /// Reward computed
    Processed,
}

impl AccrualStatus {
    /// Map to a final ledger status, or `None` while the oracle is still working.
    pub fn final_order_status(self) -> Option<OrderStatus> {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => None,
            AccrualStatus::Invalid => Some(OrderStatus::Invalid),
            AccrualStatus::Processed => Some(OrderStatus::Processed),
        }
    }
}

/// Oracle response body for a single order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAccrual {
    /// Order number echoed back
    pub order: String,
    /// Oracle-side status
    pub status: AccrualStatus,
    /// Reward amount, present once status is PROCESSED
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

/// Outcome of a single oracle lookup.
#[derive(Debug, Clone)]
pub enum AccrualLookup {
    /// The oracle has data for this order (possibly still non-final)
    Found(OrderAccrual),
    /// The oracle has no record yet; the order stays pending
    Pending,
    /// The oracle asked the caller to back off
    RateLimited {
        /// How long to wait before polling again
        retry_after: Duration,
    },
}

// =============================================================================
// Accrual client
// =============================================================================

/// REST client for the accrual oracle.
pub struct AccrualClient {
    /// HTTP client
    client: Client,
    /// Base URL including scheme, no trailing slash
    base_url: String,
}

impl AccrualClient {
    /// Create a new accrual client.
    ///
    /// Accepts either `host:port` or a full `http://...` address.
    pub fn new(address: &str) -> Self {
        let base_url = if address.starts_with("http") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch accrual data for one order number.
    pub async fn fetch_order(&self, number: &str) -> Result<AccrualLookup, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);

        let response = timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.client.get(&url).send(),
        )
        .await
        .map_err(|_| AccrualError::Unavailable("request timed out".to_string()))?
        .map_err(|e| AccrualError::Unavailable(e.to_string()))?;

        let status = response.status();
        debug!(number, %status, "Accrual oracle responded");
        match status {
            StatusCode::OK => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| AccrualError::Unexpected(e.to_string()))?;
                let parsed: OrderAccrual = serde_json::from_str(&body).map_err(|e| {
                    AccrualError::Unexpected(format!("malformed body {:?}: {}", body, e))
                })?;
                Ok(AccrualLookup::Found(parsed))
            }
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(AccrualLookup::Pending),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Ok(AccrualLookup::RateLimited {
                    retry_after: Duration::from_secs(retry_after),
                })
            }
            s if s.is_server_error() => {
                Err(AccrualError::Unavailable(format!("HTTP {}", s)))
            }
            s => Err(AccrualError::Unexpected(format!("HTTP {}", s))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
