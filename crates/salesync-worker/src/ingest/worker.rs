//! Inbox to raw snapshot stage
//!
//! Each claimed event is resolved against the order source and the result is
//! upserted into `orders_raw`. Source failures are classified so that business
//! errors dead-letter at once and transport errors back off.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::raw_store::{RawOrder, RawSnapshotStore, UpsertKind};
use super::source::OrderSource;
use crate::error::{WorkerError, WorkerResult};
use crate::normalize::extract::payload_canceled;
use crate::queue::{DeadReason, FailOutcome, InboxEvent, InboxTable, WorkQueue};
use crate::runner::{BatchReport, Stage};

/// Fetches the order behind each inbox event and stores it as a raw snapshot
pub struct IngestionWorker {
    inbox: WorkQueue<InboxTable>,
    store: RawSnapshotStore,
    source: Arc<dyn OrderSource>,
    batch_size: u32,
}

impl IngestionWorker {
    pub fn new(
        inbox: WorkQueue<InboxTable>,
        store: RawSnapshotStore,
        source: Arc<dyn OrderSource>,
        batch_size: u32,
    ) -> Self {
        Self {
            inbox,
            store,
            source,
            batch_size,
        }
    }

    pub async fn process_batch(&self) -> WorkerResult<BatchReport> {
        let events = self.inbox.claim(self.batch_size).await?;
        let mut report = BatchReport {
            claimed: events.len(),
            ..Default::default()
        };

        if events.is_empty() {
            return Ok(report);
        }

        tracing::info!(claimed = events.len(), "Claimed inbox events");

        for event in &events {
            match self.process_one(event).await {
                Ok(()) => {
                    if self.inbox.complete(event.id).await? {
                        report.completed += 1;
                    } else {
                        report.superseded += 1;
                    }
                }
                Err(err) if err.is_infrastructure() => return Err(err),
                Err(err) => self.record_failure(event, &err, &mut report).await?,
            }
        }

        Ok(report)
    }

    /// Fetch, derive the cancellation flag and upsert the raw snapshot
    pub async fn process_one(&self, event: &InboxEvent) -> WorkerResult<()> {
        let payload = self
            .source
            .fetch_order(&event.store_id, &event.order_id)
            .await?;

        let canceled =
            event.announces_cancellation() || payload_canceled(&payload).unwrap_or(false);

        let outcome = self
            .store
            .upsert(&RawOrder {
                provider: &event.provider,
                store_id: &event.store_id,
                order_id: &event.order_id,
                canceled,
                received_at: event.received_at,
                payload: &payload,
            })
            .await?;

        tracing::info!(
            event_id = event.id,
            order_id = %event.order_id,
            raw_id = outcome.id,
            changed = outcome.kind != UpsertKind::Unchanged,
            "Stored raw snapshot"
        );

        Ok(())
    }

    async fn record_failure(
        &self,
        event: &InboxEvent,
        err: &WorkerError,
        report: &mut BatchReport,
    ) -> WorkerResult<()> {
        let message = err.to_string();

        match self.inbox.fail(event, &message, err.failure_class()).await? {
            FailOutcome::RetryScheduled { next_retry_at } => {
                report.retrying += 1;
                tracing::warn!(
                    event_id = event.id,
                    order_id = %event.order_id,
                    attempts = event.attempts,
                    %next_retry_at,
                    error = %message,
                    "Inbox event failed; retry scheduled"
                );
            }
            FailOutcome::DeadLettered(DeadReason::Exhausted) => {
                report.dead += 1;
                let exhausted = WorkerError::AttemptsExhausted {
                    attempts: event.attempts,
                    message,
                };
                tracing::error!(
                    event_id = event.id,
                    order_id = %event.order_id,
                    error = %exhausted,
                    "Inbox event dead-lettered"
                );
            }
            FailOutcome::DeadLettered(DeadReason::Permanent) => {
                report.dead += 1;
                tracing::error!(
                    event_id = event.id,
                    order_id = %event.order_id,
                    error = %message,
                    "Inbox event dead-lettered: permanent failure"
                );
            }
            FailOutcome::NotClaimed => report.superseded += 1,
        }

        Ok(())
    }
}

#[async_trait]
impl Stage for IngestionWorker {
    fn name(&self) -> &'static str {
        "ingest"
    }

    async fn run_once(&self) -> WorkerResult<BatchReport> {
        self.process_batch().await
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> WorkerResult<u64> {
        self.inbox.reclaim_stale(lease_timeout).await
    }
}
