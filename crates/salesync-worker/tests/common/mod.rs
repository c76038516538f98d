//! Common test utilities for salesync integration tests using testcontainers
//!
//! Every test gets its own PostgreSQL container with migrations applied, so
//! tests never see each other's rows.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestPostgres;
//!
//! #[tokio::test]
//! async fn test_with_postgres() {
//!     let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
//!     sqlx::query("SELECT 1").execute(pg.pool()).await.expect("Query failed");
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{
    core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt,
};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use salesync_worker::queue::RetryPolicy;

pub const PROVIDER: &str = "saipos";
pub const STORE: &str = "store-1";

/// PostgreSQL test container with migrations pre-applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        salesync_worker::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,salesync_worker=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Retries become claimable immediately
pub fn immediate_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::exponential(Duration::ZERO, Duration::ZERO, max_attempts)
}

pub async fn insert_event(pool: &PgPool, order_id: &str, event_kind: &str) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO events_inbox (provider, store_id, order_id, event_kind) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(PROVIDER)
    .bind(STORE)
    .bind(order_id)
    .bind(event_kind)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn insert_event_at(pool: &PgPool, order_id: &str, received_at: DateTime<Utc>) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO events_inbox (provider, store_id, order_id, received_at) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(PROVIDER)
    .bind(STORE)
    .bind(order_id)
    .bind(received_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// `(status, attempts, last_error)` of an inbox event
pub async fn event_state(pool: &PgPool, id: i64) -> Result<(String, i32, Option<String>)> {
    let row = sqlx::query_as("SELECT status, attempts, last_error FROM events_inbox WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn count(pool: &PgPool, sql: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(sql).fetch_one(pool).await?;
    Ok(n)
}
