//! Database lifecycle management for Mart.
//!
//! Provides pool construction, migration running, and connectivity checks.
//! Failures here are fatal: the daemon aborts startup rather than serving
//! requests against a half-prepared store.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Build a connection pool for the given DSN.
///
/// Pool sizing follows the service's expected load: one long-running
/// reconciler task plus short-lived request handlers.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(2))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(3600))
        .connect(dsn)
        .await?;

    Ok(pool)
}

/// Run all pending migrations.
///
/// Uses sqlx migrations from the workspace `migrations/` directory.
/// Idempotent: safe to run multiple times.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    sqlx::migrate!("../migrations").run(pool).await?;

    info!("Migrations completed successfully");
    Ok(())
}

/// Check database connectivity and migration status.
pub async fn status(pool: &PgPool) -> Result<()> {
    let result: i64 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if result != 1 {
        return Err(anyhow::anyhow!("Database connectivity check failed"));
    }

    info!("Database connectivity: OK");

    let rows = sqlx::query(
        r#"
        SELECT version, description
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await;

    match rows {
        Ok(migs) if !migs.is_empty() => {
            for mig in migs {
                let version: i64 = mig.get("version");
                let description: String = mig.get("description");
                info!("  migration v{}: {}", version, description);
            }
        }
        Ok(_) => {
            warn!("No migrations found in database");
        }
        Err(e) => {
            if e.to_string().contains("_sqlx_migrations") {
                warn!("Migration table not found (run migrations first)");
            } else {
                return Err(e.into());
            }
        }
    }

    Ok(())
}
