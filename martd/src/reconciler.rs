//! Reconciliation loop: background settlement of pending orders.
//!
//! Each pass claims every NEW/PROCESSING order in one atomic statement,
//! queries the accrual oracle for each, and finalizes orders the oracle has
//! settled. Finalization and the balance credit commit in one transaction, so
//! a crash between passes can at worst repeat a no-op.
//!
//! A 429 from the oracle abandons the remainder of the batch; the claimed
//! orders stay PROCESSING and are reclaimed on the next pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mart_accrual::{AccrualClient, AccrualError, AccrualLookup};
use mart_domain::OrderStatus;
use mart_store::{Store, StoreError};

use crate::config::ReconcilerConfig;

// =============================================================================
// Pass statistics
// =============================================================================

/// Outcome of a single reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    /// Orders moved to a final status this pass
    pub finalized: usize,
    /// Orders the oracle has not settled yet
    pub pending: usize,
    /// Orders skipped because the oracle errored on them
    pub skipped: usize,
    /// Set when the oracle rate-limited the pass
    pub backoff: Option<Duration>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Background loop that drives pending orders to a final status.
pub struct Reconciler {
    store: Arc<dyn Store>,
    client: Arc<AccrualClient>,
    config: ReconcilerConfig,
    shutdown_token: CancellationToken,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<AccrualClient>,
        config: ReconcilerConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            client,
            config,
            shutdown_token,
        }
    }

    /// Start the reconciler in the background.
    ///
    /// Returns a JoinHandle that can be awaited during shutdown.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_ms = self.config.poll_interval.as_millis() as u64,
                "Reconciler started"
            );

            let mut next_sleep = self.config.poll_interval;

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        info!("Reconciler received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(next_sleep) => {
                        next_sleep = self.config.poll_interval;

                        match self.run_once().await {
                            Ok(stats) => {
                                if stats.finalized > 0 || stats.skipped > 0 {
                                    info!(
                                        finalized = stats.finalized,
                                        pending = stats.pending,
                                        skipped = stats.skipped,
                                        "Reconciliation pass completed"
                                    );
                                }
                                if let Some(backoff) = stats.backoff {
                                    warn!(
                                        backoff_secs = backoff.as_secs(),
                                        "Oracle rate limit hit, backing off"
                                    );
                                    next_sleep = backoff;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Reconciliation pass failed");
                            }
                        }
                    }
                }
            }

            info!("Reconciler stopped");
        })
    }

    /// Run one reconciliation pass.
    ///
    /// Only claim failures abort the pass; per-order oracle errors are logged
    /// and skipped so one broken order cannot starve the rest.
    pub async fn run_once(&self) -> Result<PassStats, StoreError> {
        let numbers = self.store.orders().claim_pending_batch().await?;
        let mut stats = PassStats::default();

        if numbers.is_empty() {
            return Ok(stats);
        }

        debug!(count = numbers.len(), "Claimed pending orders");

        for number in numbers {
            match self.client.fetch_order(&number).await {
                Ok(AccrualLookup::Found(info)) => {
                    let Some(status) = info.status.final_order_status() else {
                        stats.pending += 1;
                        continue;
                    };

                    // INVALID never credits, so the plain update suffices;
                    // PROCESSED must commit the credit in the same transaction.
                    let result = if status == OrderStatus::Processed {
                        self.store
                            .finalize_with_credit(&number, status, info.accrual)
                            .await
                    } else {
                        self.store.orders().finalize(&number, status, None).await
                    };

                    match result {
                        Ok(()) => {
                            debug!(number = %number, status = status.as_str(), "Order finalized");
                            stats.finalized += 1;
                        }
                        Err(e) => {
                            // Leave the order PROCESSING; next pass retries.
                            warn!(number = %number, error = %e, "Failed to finalize order");
                            stats.skipped += 1;
                        }
                    }
                }
                Ok(AccrualLookup::Pending) => {
                    stats.pending += 1;
                }
                Ok(AccrualLookup::RateLimited { retry_after }) => {
                    stats.backoff = Some(retry_after);
                    break;
                }
                Err(AccrualError::Unavailable(msg)) => {
                    warn!(number = %number, error = %msg, "Oracle unavailable, skipping order");
                    stats.skipped += 1;
                }
                Err(AccrualError::Unexpected(msg)) => {
                    warn!(number = %number, error = %msg, "Unexpected oracle response, skipping order");
                    stats.skipped += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Request shutdown of the reconciler loop.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
