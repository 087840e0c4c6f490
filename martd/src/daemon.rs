//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Store (Postgres in production, in-memory in tests)
//! - Accrual client
//! - Reconciliation loop
//! - API server
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Connect to Postgres and run migrations (fatal on failure)
//! 3. Start the reconciler
//! 4. Start the API server
//! 5. Wait for SIGINT
//! 6. Graceful shutdown: reject new requests, cancel the reconciler, wait
//!    for in-flight work up to the grace period, close the pool

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mart_accrual::AccrualClient;
use mart_store::{PgStore, Store};

use crate::api::{create_router, AppState};
use crate::auth::TokenKeys;
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::reconciler::Reconciler;

// =============================================================================
// Daemon
// =============================================================================

/// The main Mart daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Store backend
    store: Arc<dyn Store>,
    /// Accrual oracle client
    accrual: Arc<AccrualClient>,
    /// Connection pool, closed during shutdown. None for in-memory stores.
    pool: Option<PgPool>,
    /// Flag the API checks to reject requests during shutdown
    shutting_down: Arc<AtomicBool>,
    /// Cancellation token for background tasks
    shutdown_token: CancellationToken,
}

impl Daemon {
    /// Create a daemon backed by Postgres.
    ///
    /// Connects and migrates before anything is served; a failure here
    /// aborts startup.
    pub async fn new(config: Config) -> DaemonResult<Self> {
        let pool = mart_db::connect(&config.database_uri)
            .await
            .map_err(|e| DaemonError::Database(format!("connect failed: {e}")))?;

        mart_db::migrate(&pool)
            .await
            .map_err(|e| DaemonError::Database(format!("migrations failed: {e}")))?;

        mart_db::status(&pool)
            .await
            .map_err(|e| DaemonError::Database(format!("status check failed: {e}")))?;

        let store = Arc::new(PgStore::new(Arc::new(pool.clone())));
        let accrual = Arc::new(AccrualClient::new(&config.accrual_address));

        Ok(Self {
            config,
            store,
            accrual,
            pool: Some(pool),
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Create a daemon with a provided store (for testing).
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let accrual = Arc::new(AccrualClient::new(&config.accrual_address));

        Self {
            config,
            store,
            accrual,
            pool: None,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        let reconciler = Arc::new(Reconciler::new(
            self.store.clone(),
            self.accrual.clone(),
            self.config.reconciler.clone(),
            self.shutdown_token.clone(),
        ));
        let reconciler_handle = reconciler.start();

        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        // New requests get 503 from here on.
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_token.cancel();

        match tokio::time::timeout(self.config.shutdown_grace, reconciler_handle).await {
            Ok(Ok(())) => info!("Reconciler drained"),
            Ok(Err(e)) => error!(error = %e, "Reconciler task panicked"),
            Err(_) => warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Reconciler did not stop within grace period"
            ),
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
            info!("Database pool closed");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = AppState {
            store: self.store.clone(),
            accrual: self.accrual.clone(),
            tokens: Arc::new(TokenKeys::new(
                &self.config.auth.token_secret,
                self.config.auth.token_ttl,
            )),
            shutting_down: self.shutting_down.clone(),
        };

        let router = create_router(state);
        let addr = &self.config.server.address;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        let token = self.shutdown_token.clone();
        tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mart_store::MemoryStore;

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::with_store(Config::test(), Arc::new(MemoryStore::new()));

        let addr = daemon.start_api_server().await.unwrap();
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_shutdown_flag_turns_api_away() {
        let daemon = Daemon::with_store(Config::test(), Arc::new(MemoryStore::new()));
        let addr = daemon.start_api_server().await.unwrap();

        daemon.shutting_down.store(true, Ordering::SeqCst);

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/api/user/register", addr))
            .json(&serde_json::json!({ "login": "a", "password": "b" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        // Health stays reachable for liveness probes.
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
