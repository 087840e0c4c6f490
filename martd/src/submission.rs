//! Order submission handler.
//!
//! Synchronous path for one incoming order number: validate the checksum,
//! resolve ownership, consult the accrual oracle once, and persist. Orders the
//! oracle has not finished with are stored NEW/PROCESSING and picked up later
//! by the reconciler.

use mart_accrual::{AccrualClient, AccrualError, AccrualLookup, AccrualStatus};
use mart_domain::{DomainError, OrderNumber, OrderStatus};
use mart_store::{Store, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// Outcomes
// =============================================================================

/// Successful submission outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The caller already submitted this number earlier (HTTP 200)
    AlreadyOwned,
    /// The number was accepted for processing (HTTP 202)
    Accepted,
}

/// Submission failures.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The number is not a plausible order number (HTTP 400)
    #[error("Order number format is invalid")]
    Format,

    /// The number fails the Luhn checksum (HTTP 422)
    #[error("Order number checksum is invalid")]
    Checksum,

    /// Another user already owns this number (HTTP 409)
    #[error("Order number belongs to another user")]
    OwnedByOther,

    /// Store failure (HTTP 500)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Oracle failure on the synchronous path (HTTP 500)
    #[error("Accrual error: {0}")]
    Accrual(#[from] AccrualError),
}

// =============================================================================
// Handler
// =============================================================================

/// Process one submitted order number for `user_id`.
///
/// Ownership is first-writer-wins: a lost insert race resolves by re-reading
/// the owner, never by error.
pub async fn submit_order(
    store: &dyn Store,
    accrual: &AccrualClient,
    user_id: i64,
    raw_number: &str,
) -> Result<SubmissionOutcome, SubmissionError> {
    let number = OrderNumber::parse(raw_number).map_err(|e| match e {
        DomainError::OrderNumberChecksum(_) => SubmissionError::Checksum,
        _ => SubmissionError::Format,
    })?;
    let number = number.as_str();

    if let Some(owner) = store.orders().find_owner(number).await? {
        return resolve_owner(owner, user_id);
    }

    // Fast path: one oracle lookup so fully-settled orders are credited
    // immediately instead of waiting for the reconciler.
    let lookup = accrual.fetch_order(number).await?;

    let result = match lookup {
        AccrualLookup::Found(info) => match info.status {
            AccrualStatus::Processed => {
                let amount = info.accrual.unwrap_or_default();
                store.create_processed(number, user_id, amount).await
            }
            AccrualStatus::Invalid => {
                store
                    .orders()
                    .create(number, user_id, OrderStatus::Invalid, None)
                    .await
            }
            AccrualStatus::Registered | AccrualStatus::Processing => {
                store
                    .orders()
                    .create(number, user_id, OrderStatus::Processing, None)
                    .await
            }
        },
        AccrualLookup::Pending => {
            store
                .orders()
                .create(number, user_id, OrderStatus::New, None)
                .await
        }
        AccrualLookup::RateLimited { retry_after } => {
            // The reconciler owns backoff; the submission just parks the
            // order as NEW and lets the loop retry it.
            debug!(number, ?retry_after, "Oracle rate-limited during submission");
            store
                .orders()
                .create(number, user_id, OrderStatus::New, None)
                .await
        }
    };

    match result {
        Ok(()) => Ok(SubmissionOutcome::Accepted),
        Err(e) if e.is_duplicate() => {
            // Lost the insert race. The winner decides the outcome.
            match store.orders().find_owner(number).await? {
                Some(owner) => resolve_owner(owner, user_id),
                None => {
                    warn!(number, "Order vanished after duplicate conflict");
                    Err(SubmissionError::Store(e))
                }
            }
        }
        Err(e) => Err(SubmissionError::Store(e)),
    }
}

fn resolve_owner(owner: i64, user_id: i64) -> Result<SubmissionOutcome, SubmissionError> {
    if owner == user_id {
        Ok(SubmissionOutcome::AlreadyOwned)
    } else {
        Err(SubmissionError::OwnedByOther)
    }
}

// =============================================================================
// Tests
// =============================================================================
