//! Connection pool, migrations and queue overview queries

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{WorkerError, WorkerResult};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn create_pool(config: &DatabaseConfig) -> WorkerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> WorkerResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(WorkerError::from)
}

pub async fn run_migrations(pool: &PgPool) -> WorkerResult<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| WorkerError::config(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Row counts an operator looks at first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOverview {
    /// `(status, count)` for every inbox status present
    pub inbox: Vec<(String, i64)>,
    pub raw_normalized: i64,
    pub raw_pending: i64,
    /// Unnormalized snapshots whose last attempt failed
    pub raw_failing: i64,
}

pub async fn queue_overview(pool: &PgPool) -> WorkerResult<QueueOverview> {
    let inbox: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*)::bigint FROM events_inbox GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;

    let (raw_normalized, raw_pending, raw_failing): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE normalized)::bigint,
            COUNT(*) FILTER (WHERE NOT normalized)::bigint,
            COUNT(*) FILTER (WHERE NOT normalized AND last_error IS NOT NULL)::bigint
        FROM orders_raw
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(QueueOverview {
        inbox,
        raw_normalized,
        raw_pending,
        raw_failing,
    })
}
