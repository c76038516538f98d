//! Raw snapshot to normalized rows stage

use async_trait::async_trait;
use std::time::Duration;

use super::extract::NormalizedSale;
use super::store::{store_sale, OrderKey, StoredSale};
use crate::error::WorkerResult;
use crate::ingest::RawSnapshotStore;
use crate::queue::{FailOutcome, RawSnapshot};
use crate::runner::{BatchReport, Stage};

/// Turns unnormalized raw snapshots into normalized rows
pub struct NormalizationWorker {
    store: RawSnapshotStore,
    batch_size: u32,
}

impl NormalizationWorker {
    pub fn new(store: RawSnapshotStore, batch_size: u32) -> Self {
        Self { store, batch_size }
    }

    pub async fn process_batch(&self) -> WorkerResult<BatchReport> {
        let rows = self.store.pick_unnormalized(self.batch_size).await?;
        let mut report = BatchReport {
            claimed: rows.len(),
            ..Default::default()
        };

        if rows.is_empty() {
            return Ok(report);
        }

        tracing::info!(claimed = rows.len(), "Claimed raw snapshots for normalization");

        for raw in &rows {
            match self.normalize_one(raw).await {
                Ok(stored) => {
                    if self.store.mark_normalized(raw.id).await? {
                        report.completed += 1;
                        tracing::info!(
                            raw_id = raw.id,
                            order_id = %raw.order_id,
                            order_ref = stored.order_ref,
                            customer_id = stored.customer_id,
                            "Normalized order"
                        );
                    } else {
                        report.superseded += 1;
                        tracing::info!(
                            raw_id = raw.id,
                            order_id = %raw.order_id,
                            "Payload changed during normalization; will normalize again"
                        );
                    }
                }
                Err(err) if err.is_infrastructure() => return Err(err),
                Err(err) => {
                    let message = err.to_string();
                    match self.store.mark_failed(raw, &message, err.failure_class()).await? {
                        FailOutcome::RetryScheduled { next_retry_at } => {
                            report.retrying += 1;
                            tracing::warn!(
                                raw_id = raw.id,
                                order_id = %raw.order_id,
                                attempts = raw.attempts + 1,
                                %next_retry_at,
                                error = %message,
                                "Normalization failed"
                            );
                        }
                        FailOutcome::DeadLettered(_) => report.dead += 1,
                        FailOutcome::NotClaimed => report.superseded += 1,
                    }
                }
            }
        }

        Ok(report)
    }

    /// Extract and store one snapshot
    pub async fn normalize_one(&self, raw: &RawSnapshot) -> WorkerResult<StoredSale> {
        let sale = NormalizedSale::from_payload(&raw.payload, raw.canceled)?;

        if sale.items.is_empty() {
            tracing::info!(
                raw_id = raw.id,
                order_id = %raw.order_id,
                "No items in payload; normalizing order only"
            );
        }

        let key = OrderKey {
            provider: &raw.provider,
            store_id: &raw.store_id,
            order_id: &raw.order_id,
        };

        store_sale(self.store.pool(), key, raw.received_at, &sale).await
    }
}

#[async_trait]
impl Stage for NormalizationWorker {
    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn run_once(&self) -> WorkerResult<BatchReport> {
        self.process_batch().await
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> WorkerResult<u64> {
        self.store.reclaim_stale(lease_timeout).await
    }
}
