//! Queue row types and their table bindings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{QueueItem, QueueTable};

/// Lifecycle of an inbox event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Pending,
    Processing,
    Done,
    Error,
    Dead,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Pending => "pending",
            InboxStatus::Processing => "processing",
            InboxStatus::Done => "done",
            InboxStatus::Error => "error",
            InboxStatus::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InboxStatus::Done | InboxStatus::Dead)
    }
}

impl std::str::FromStr for InboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InboxStatus::Pending),
            "processing" => Ok(InboxStatus::Processing),
            "done" => Ok(InboxStatus::Done),
            "error" => Ok(InboxStatus::Error),
            "dead" => Ok(InboxStatus::Dead),
            other => Err(format!("unknown inbox status '{}'", other)),
        }
    }
}

/// A request to fetch one order from the provider
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboxEvent {
    pub id: i64,
    pub provider: String,
    pub store_id: String,
    pub order_id: String,
    pub event_kind: Option<String>,
    pub status: String,
    pub attempts: i32,
    pub received_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl InboxEvent {
    pub fn status(&self) -> Option<InboxStatus> {
        self.status.parse().ok()
    }

    /// Event kinds that announce a cancellation
    pub fn announces_cancellation(&self) -> bool {
        self.event_kind
            .as_deref()
            .map(|kind| kind.to_lowercase().contains("cancel"))
            .unwrap_or(false)
    }
}

impl QueueItem for InboxEvent {
    fn id(&self) -> i64 {
        self.id
    }

    fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    fn attempts(&self) -> i32 {
        self.attempts
    }
}

/// The latest payload seen for one provider order
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawSnapshot {
    pub id: i64,
    pub provider: String,
    pub store_id: String,
    pub order_id: String,
    pub canceled: bool,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
    pub payload_hash: String,
    pub normalized: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl QueueItem for RawSnapshot {
    fn id(&self) -> i64 {
        self.id
    }

    fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Normalization attempts are counted on failure, not on claim
    fn attempts(&self) -> i32 {
        self.attempts + 1
    }
}

/// `events_inbox`: pending → processing → done | error | dead
pub struct InboxTable;

impl QueueTable for InboxTable {
    type Row = InboxEvent;

    const NAME: &'static str = "inbox";
    const TABLE: &'static str = "events_inbox";
    const COLUMNS: &'static str = "id, provider, store_id, order_id, event_kind, status, \
        attempts, received_at, next_retry_at, last_error";
    const READY: &'static str = "status IN ('pending', 'error') \
        AND (next_retry_at IS NULL OR next_retry_at <= NOW())";
    const CLAIMED: &'static str = "status = 'processing'";
    const ON_CLAIM: &'static str =
        "status = 'processing', processing_started_at = NOW(), attempts = attempts + 1";
    const ON_COMPLETE: &'static str = "status = 'done', processing_started_at = NULL, \
        last_error = NULL, next_retry_at = NULL";
    const ON_RETRY: &'static str = "status = 'error', processing_started_at = NULL, \
        last_error = $2, next_retry_at = NOW() + ($3::bigint * INTERVAL '1 millisecond')";
    const ON_DEAD: Option<&'static str> = Some(
        "status = 'dead', processing_started_at = NULL, last_error = $2, next_retry_at = NULL",
    );
    const ON_RECLAIM: &'static str = "status = 'error', processing_started_at = NULL, \
        last_error = 'lease expired', next_retry_at = NOW()";
    const ON_RECLAIM_EXHAUSTED: Option<&'static str> = Some(
        "status = 'dead', processing_started_at = NULL, last_error = 'lease expired', \
         next_retry_at = NULL",
    );
}

/// `orders_raw`: claimed through `processing_started_at`, finished by `normalized`
pub struct RawSnapshotTable;

impl QueueTable for RawSnapshotTable {
    type Row = RawSnapshot;

    const NAME: &'static str = "orders_raw";
    const TABLE: &'static str = "orders_raw";
    const COLUMNS: &'static str = "id, provider, store_id, order_id, canceled, received_at, \
        payload, payload_hash, normalized, attempts, last_error";
    const READY: &'static str = "normalized = FALSE AND processing_started_at IS NULL \
        AND (next_retry_at IS NULL OR next_retry_at <= NOW())";
    const CLAIMED: &'static str = "processing_started_at IS NOT NULL";
    const ON_CLAIM: &'static str = "processing_started_at = NOW()";
    const ON_COMPLETE: &'static str = "normalized = TRUE, normalized_at = NOW(), \
        processing_started_at = NULL, last_error = NULL, next_retry_at = NULL";
    const ON_RETRY: &'static str = "processing_started_at = NULL, attempts = attempts + 1, \
        last_error = $2, next_retry_at = NOW() + ($3::bigint * INTERVAL '1 millisecond')";
    const ON_DEAD: Option<&'static str> = None;
    const ON_RECLAIM: &'static str = "processing_started_at = NULL, \
        last_error = 'lease expired', next_retry_at = NOW()";
    const ON_RECLAIM_EXHAUSTED: Option<&'static str> = None;
}
