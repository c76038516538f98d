//! Content-addressed raw snapshot storage
//!
//! One row per `(provider, store_id, order_id)` holds the latest payload and
//! its fingerprint. Re-delivering identical content refreshes the row but
//! leaves normalization bookkeeping alone; a changed fingerprint resets it so
//! the order is normalized again.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

use salesync_common::checksum::payload_fingerprint;

use crate::error::WorkerResult;
use crate::queue::{FailOutcome, FailureClass, RawSnapshot, RawSnapshotTable, RetryPolicy, WorkQueue};

/// A fetched payload ready to be stored
#[derive(Debug, Clone)]
pub struct RawOrder<'a> {
    pub provider: &'a str,
    pub store_id: &'a str,
    pub order_id: &'a str,
    pub canceled: bool,
    pub received_at: DateTime<Utc>,
    pub payload: &'a Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    /// Fingerprint changed; normalization bookkeeping was reset
    Changed,
    /// Same fingerprint; bookkeeping untouched
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub payload_hash: String,
    pub kind: UpsertKind,
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    id: i64,
    previous_hash: Option<String>,
}

/// Owner of `orders_raw`: written by ingestion, claimed by normalization
#[derive(Clone)]
pub struct RawSnapshotStore {
    claims: WorkQueue<RawSnapshotTable>,
}

impl RawSnapshotStore {
    /// `policy` schedules retries of failed normalizations
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            claims: WorkQueue::new(pool, policy),
        }
    }

    pub fn pool(&self) -> &PgPool {
        self.claims.pool()
    }

    /// Insert or refresh a snapshot, resetting normalization only on new content
    pub async fn upsert(&self, order: &RawOrder<'_>) -> WorkerResult<UpsertOutcome> {
        let payload_hash = payload_fingerprint(order.payload)?;

        let row: UpsertRow = sqlx::query_as(
            r#"
            WITH previous AS (
                SELECT payload_hash
                FROM orders_raw
                WHERE provider = $1 AND store_id = $2 AND order_id = $3
            )
            INSERT INTO orders_raw (provider, store_id, order_id, canceled, received_at, payload, payload_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT ux_orders_raw_key DO UPDATE SET
                canceled = EXCLUDED.canceled,
                received_at = EXCLUDED.received_at,
                payload = EXCLUDED.payload,
                payload_hash = EXCLUDED.payload_hash,
                normalized = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN FALSE ELSE orders_raw.normalized END,
                normalized_at = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN NULL ELSE orders_raw.normalized_at END,
                attempts = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN 0 ELSE orders_raw.attempts END,
                last_error = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN NULL ELSE orders_raw.last_error END,
                next_retry_at = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN NULL ELSE orders_raw.next_retry_at END,
                processing_started_at = CASE WHEN orders_raw.payload_hash IS DISTINCT FROM EXCLUDED.payload_hash
                    THEN NULL ELSE orders_raw.processing_started_at END
            RETURNING id, (SELECT payload_hash FROM previous) AS previous_hash
            "#,
        )
        .bind(order.provider)
        .bind(order.store_id)
        .bind(order.order_id)
        .bind(order.canceled)
        .bind(order.received_at)
        .bind(order.payload)
        .bind(&payload_hash)
        .fetch_one(self.pool())
        .await?;

        let kind = match row.previous_hash {
            None => UpsertKind::Inserted,
            Some(previous) if previous == payload_hash => UpsertKind::Unchanged,
            Some(_) => UpsertKind::Changed,
        };

        Ok(UpsertOutcome {
            id: row.id,
            payload_hash,
            kind,
        })
    }

    /// Claim unnormalized, retry-eligible snapshots, oldest first
    pub async fn pick_unnormalized(&self, limit: u32) -> WorkerResult<Vec<RawSnapshot>> {
        self.claims.claim(limit).await
    }

    /// False when the claim was released meanwhile (e.g. by a newer payload)
    pub async fn mark_normalized(&self, id: i64) -> WorkerResult<bool> {
        self.claims.complete(id).await
    }

    pub async fn mark_failed(
        &self,
        raw: &RawSnapshot,
        message: &str,
        class: FailureClass,
    ) -> WorkerResult<FailOutcome> {
        self.claims.fail(raw, message, class).await
    }

    pub async fn reclaim_stale(&self, lease_timeout: Duration) -> WorkerResult<u64> {
        self.claims.reclaim_stale(lease_timeout).await
    }
}
