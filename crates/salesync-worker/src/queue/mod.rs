//! Durable work queues over PostgreSQL rows
//!
//! Both pipeline stages share one claim protocol. A claim picks the oldest
//! ready rows with `FOR UPDATE SKIP LOCKED` and marks them as claimed in the
//! same statement, so concurrent workers never receive the same row. A claimed
//! row is finished with [`WorkQueue::complete`] or [`WorkQueue::fail`]; both
//! only touch rows that are still claimed and report whether they did.
//!
//! What "ready", "claimed" and each transition mean for a given table is
//! described by a [`QueueTable`] implementation (see [`InboxTable`] and
//! [`RawSnapshotTable`]).

mod retry;
mod types;

pub use retry::{Backoff, DeadReason, Disposition, FailureClass, RetryPolicy, MAX_JITTER};
pub use types::{InboxEvent, InboxStatus, InboxTable, RawSnapshot, RawSnapshotTable};

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::PgPool;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::WorkerResult;

/// Accessors the queue needs on a claimed row
pub trait QueueItem {
    fn id(&self) -> i64;
    fn received_at(&self) -> DateTime<Utc>;
    /// 1-based number of the attempt currently in flight
    fn attempts(&self) -> i32;
}

/// SQL fragments binding the claim protocol to one table.
///
/// `ON_RETRY` may reference `$2` (error message) and `$3` (delay in
/// milliseconds); `ON_DEAD` may reference `$2`.
pub trait QueueTable: Send + Sync + 'static {
    type Row: for<'r> sqlx::FromRow<'r, PgRow> + QueueItem + Send + Unpin;

    /// Short name used in log fields
    const NAME: &'static str;
    const TABLE: &'static str;
    const COLUMNS: &'static str;
    /// Predicate selecting rows that may be claimed now
    const READY: &'static str;
    /// Predicate that holds while a row is claimed
    const CLAIMED: &'static str;
    const ON_CLAIM: &'static str;
    const ON_COMPLETE: &'static str;
    const ON_RETRY: &'static str;
    /// `None` for tables without a terminal failure state
    const ON_DEAD: Option<&'static str>;
    const ON_RECLAIM: &'static str;
    /// Applied instead of `ON_RECLAIM` to stale rows that already used up
    /// their attempts; `None` for tables without a terminal failure state
    const ON_RECLAIM_EXHAUSTED: Option<&'static str>;
}

/// Result of [`WorkQueue::fail`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailOutcome {
    RetryScheduled { next_retry_at: DateTime<Utc> },
    DeadLettered(DeadReason),
    /// The row was no longer claimed; nothing changed
    NotClaimed,
}

pub struct WorkQueue<Q: QueueTable> {
    pool: PgPool,
    policy: RetryPolicy,
    claim_sql: String,
    complete_sql: String,
    retry_sql: String,
    dead_sql: Option<String>,
    reclaim_sql: String,
    reclaim_exhausted_sql: Option<String>,
    _table: PhantomData<fn() -> Q>,
}

impl<Q: QueueTable> Clone for WorkQueue<Q> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            policy: self.policy.clone(),
            claim_sql: self.claim_sql.clone(),
            complete_sql: self.complete_sql.clone(),
            retry_sql: self.retry_sql.clone(),
            dead_sql: self.dead_sql.clone(),
            reclaim_sql: self.reclaim_sql.clone(),
            reclaim_exhausted_sql: self.reclaim_exhausted_sql.clone(),
            _table: PhantomData,
        }
    }
}

impl<Q: QueueTable> WorkQueue<Q> {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        let claim_sql = format!(
            r#"
            WITH picked AS (
                SELECT id AS picked_id
                FROM {table}
                WHERE {ready}
                ORDER BY received_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {table}
            SET {on_claim}
            FROM picked
            WHERE {table}.id = picked.picked_id
            RETURNING {columns}
            "#,
            table = Q::TABLE,
            ready = Q::READY,
            on_claim = Q::ON_CLAIM,
            columns = qualified_columns(Q::TABLE, Q::COLUMNS),
        );

        let complete_sql = format!(
            "UPDATE {} SET {} WHERE id = $1 AND {}",
            Q::TABLE,
            Q::ON_COMPLETE,
            Q::CLAIMED
        );

        let retry_sql = format!(
            "UPDATE {} SET {} WHERE id = $1 AND {} RETURNING next_retry_at",
            Q::TABLE,
            Q::ON_RETRY,
            Q::CLAIMED
        );

        let dead_sql = Q::ON_DEAD.map(|on_dead| {
            format!(
                "UPDATE {} SET {} WHERE id = $1 AND {}",
                Q::TABLE,
                on_dead,
                Q::CLAIMED
            )
        });

        let reclaim_sql = format!(
            "UPDATE {} SET {} WHERE {} \
             AND processing_started_at < NOW() - ($1::bigint * INTERVAL '1 millisecond')",
            Q::TABLE,
            Q::ON_RECLAIM,
            Q::CLAIMED
        );

        let reclaim_exhausted_sql = Q::ON_RECLAIM_EXHAUSTED.map(|on_exhausted| {
            format!(
                "UPDATE {} SET {} WHERE {} \
                 AND processing_started_at < NOW() - ($1::bigint * INTERVAL '1 millisecond') \
                 AND attempts >= $2",
                Q::TABLE,
                on_exhausted,
                Q::CLAIMED
            )
        });

        Self {
            pool,
            policy,
            claim_sql,
            complete_sql,
            retry_sql,
            dead_sql,
            reclaim_sql,
            reclaim_exhausted_sql,
            _table: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Claim up to `batch_size` ready rows, oldest arrival first
    pub async fn claim(&self, batch_size: u32) -> WorkerResult<Vec<Q::Row>> {
        let mut rows: Vec<Q::Row> = sqlx::query_as(&self.claim_sql)
            .bind(i64::from(batch_size))
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the CTE order
        rows.sort_by_key(|row| (row.received_at(), row.id()));

        if !rows.is_empty() {
            tracing::debug!(queue = Q::NAME, claimed = rows.len(), "Claimed rows");
        }

        Ok(rows)
    }

    /// Mark a claimed row as finished. Returns false if it was no longer claimed.
    pub async fn complete(&self, id: i64) -> WorkerResult<bool> {
        let result = sqlx::query(&self.complete_sql)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed attempt on a claimed row and move it to retry or dead
    pub async fn fail(
        &self,
        row: &Q::Row,
        message: &str,
        class: FailureClass,
    ) -> WorkerResult<FailOutcome> {
        let attempts = u32::try_from(row.attempts()).unwrap_or(0).max(1);

        let delay = match self.policy.decide(attempts, class) {
            Disposition::Dead(reason) => match &self.dead_sql {
                Some(dead_sql) => {
                    let result = sqlx::query(dead_sql)
                        .bind(row.id())
                        .bind(message)
                        .execute(&self.pool)
                        .await?;

                    return Ok(if result.rows_affected() == 1 {
                        FailOutcome::DeadLettered(reason)
                    } else {
                        FailOutcome::NotClaimed
                    });
                }
                None => self.policy.backoff(attempts),
            },
            Disposition::Retry { delay } => delay,
        };

        let next_retry_at: Option<DateTime<Utc>> = sqlx::query_scalar(&self.retry_sql)
            .bind(row.id())
            .bind(message)
            .bind(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
            .fetch_optional(&self.pool)
            .await?;

        Ok(match next_retry_at {
            Some(next_retry_at) => FailOutcome::RetryScheduled { next_retry_at },
            None => FailOutcome::NotClaimed,
        })
    }

    /// Release rows claimed longer than `lease_timeout` ago. Returns how many.
    ///
    /// A stale row whose lost attempt was its last one is dead-lettered
    /// instead of released, when the table has a dead state and the policy
    /// caps attempts.
    pub async fn reclaim_stale(&self, lease_timeout: Duration) -> WorkerResult<u64> {
        let lease_ms = i64::try_from(lease_timeout.as_millis()).unwrap_or(i64::MAX);

        let mut dead = 0;
        if let (Some(exhausted_sql), Some(max_attempts)) =
            (&self.reclaim_exhausted_sql, self.policy.max_attempts())
        {
            let result = sqlx::query(exhausted_sql)
                .bind(lease_ms)
                .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
                .execute(&self.pool)
                .await?;

            dead = result.rows_affected();
            if dead > 0 {
                tracing::error!(
                    queue = Q::NAME,
                    dead,
                    max_attempts,
                    "Dead-lettered stale claims with no attempts left"
                );
            }
        }

        let result = sqlx::query(&self.reclaim_sql)
            .bind(lease_ms)
            .execute(&self.pool)
            .await?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::warn!(
                queue = Q::NAME,
                released,
                lease_timeout_secs = lease_timeout.as_secs(),
                "Released stale claims"
            );
        }

        Ok(dead + released)
    }
}

fn qualified_columns(table: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|column| format!("{}.{}", table, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_columns() {
        assert_eq!(
            qualified_columns("events_inbox", "id, status,\n attempts"),
            "events_inbox.id, events_inbox.status, events_inbox.attempts"
        );
    }

    #[tokio::test]
    async fn test_claim_sql_shape() {
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        let queue: WorkQueue<InboxTable> =
            WorkQueue::new(pool, RetryPolicy::fixed(Duration::from_secs(1)));

        assert!(queue.claim_sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(queue.claim_sql.contains("ORDER BY received_at ASC, id ASC"));
        assert!(queue.claim_sql.contains("RETURNING events_inbox.id"));
        assert!(queue.complete_sql.ends_with("status = 'processing'"));
        assert!(queue.dead_sql.is_some());
    }

    #[tokio::test]
    async fn test_inbox_reclaim_dead_letters_exhausted_rows() {
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        let queue: WorkQueue<InboxTable> = WorkQueue::new(
            pool,
            RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(60), 3),
        );

        let exhausted = queue.reclaim_exhausted_sql.as_deref().unwrap();
        assert!(exhausted.contains("status = 'dead'"));
        assert!(exhausted.ends_with("AND attempts >= $2"));
        assert!(queue.reclaim_sql.contains("status = 'error'"));
    }

    #[tokio::test]
    async fn test_raw_queue_has_no_dead_state() {
        let pool = PgPool::connect_lazy("postgresql://localhost/unused").unwrap();
        let queue: WorkQueue<RawSnapshotTable> =
            WorkQueue::new(pool, RetryPolicy::fixed(Duration::from_secs(300)));

        assert!(queue.dead_sql.is_none());
        assert!(queue.reclaim_exhausted_sql.is_none());
        assert!(queue.retry_sql.contains("attempts = attempts + 1"));
    }
}
