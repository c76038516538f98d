//! Upstream order source contract
//!
//! The concrete HTTP client and its credentials live outside this crate. The
//! pipeline only needs a single-order lookup ([`OrderSource`]) and, for
//! window backfills, an offset-paged listing ([`PagedSource`]).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::WorkerError;
use crate::normalize::probe::{first_array, PAGE_ROWS};
use crate::queue::FailureClass;

/// Upstream business code meaning "no such order"
const NOT_FOUND_CODE: &str = "404";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("errorCode={code}: {message}")]
    Business { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl SourceError {
    pub fn classify(&self) -> FailureClass {
        match self {
            SourceError::Timeout(_) | SourceError::Transport(_) => FailureClass::Transient,
            SourceError::Http { status, .. } if *status == 429 || *status >= 500 => {
                FailureClass::Transient
            }
            SourceError::Business { code, .. } if code == NOT_FOUND_CODE => FailureClass::Permanent,
            other => FailureClass::classify_message(&other.to_string()),
        }
    }
}

impl From<SourceError> for WorkerError {
    fn from(err: SourceError) -> Self {
        match err.classify() {
            FailureClass::Permanent => WorkerError::Permanent(err.to_string()),
            FailureClass::Transient => WorkerError::Transient(err.to_string()),
        }
    }
}

/// Single-order lookup
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_order(&self, store_id: &str, order_id: &str) -> Result<Value, SourceError>;
}

/// Date window over one of the listing's timestamp columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    /// e.g. "shift_date", "created_at", "updated_at"
    pub column: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Offset-paged listing of records in a date window
#[async_trait]
pub trait PagedSource: Send + Sync {
    async fn fetch_page(
        &self,
        window: &DateWindow,
        limit: u32,
        offset: u64,
    ) -> Result<Value, SourceError>;
}

/// Rows of one listing page: a bare array, or one wrapped in `data`/`items`
pub fn extract_page_rows(page: &Value) -> Vec<Value> {
    first_array(page, PAGE_ROWS).cloned().unwrap_or_default()
}

/// Collect every row in `window`. Stops on an empty page, a page shorter
/// than `page_size`, or after `max_pages` pages.
pub async fn fetch_window_pages<S>(
    source: &S,
    window: &DateWindow,
    page_size: u32,
    max_pages: u32,
) -> Result<Vec<Value>, SourceError>
where
    S: PagedSource + ?Sized,
{
    let mut rows = Vec::new();

    for page in 0..max_pages {
        let offset = u64::from(page) * u64::from(page_size);
        let raw = source.fetch_page(window, page_size, offset).await?;
        let page_rows = extract_page_rows(&raw);

        let fetched = page_rows.len();
        tracing::debug!(page, offset, fetched, "Fetched listing page");

        rows.extend(page_rows);

        if fetched == 0 || fetched < page_size as usize {
            break;
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_source_error_classification() {
        assert_eq!(
            SourceError::Timeout(Duration::from_secs(20)).classify(),
            FailureClass::Transient
        );
        assert_eq!(
            SourceError::Http { status: 503, body: "busy".into() }.classify(),
            FailureClass::Transient
        );
        assert_eq!(
            SourceError::Business { code: "404".into(), message: "x".into() }.classify(),
            FailureClass::Permanent
        );
        assert_eq!(
            SourceError::Business {
                code: "12".into(),
                message: "Não existe pedido com esse id".into()
            }
            .classify(),
            FailureClass::Permanent
        );
        assert_eq!(
            SourceError::Http { status: 400, body: "bad filter".into() }.classify(),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_source_error_into_worker_error() {
        let err: WorkerError = SourceError::Business {
            code: "404".into(),
            message: "order not found".into(),
        }
        .into();
        assert!(matches!(err, WorkerError::Permanent(_)));

        let err: WorkerError = SourceError::Transport("connection reset".into()).into();
        assert!(matches!(err, WorkerError::Transient(_)));
    }

    #[test]
    fn test_extract_page_rows() {
        assert_eq!(extract_page_rows(&json!([{"a": 1}])).len(), 1);
        assert_eq!(extract_page_rows(&json!({"data": [{}, {}]})).len(), 2);
        assert_eq!(extract_page_rows(&json!({"items": [{}]})).len(), 1);
        assert!(extract_page_rows(&json!({"error": "nope"})).is_empty());
    }

    /// Serves `total` numbered rows, optionally wrapped in `data`
    struct FakeListing {
        total: u64,
        wrapped: bool,
        offsets: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl PagedSource for FakeListing {
        async fn fetch_page(
            &self,
            _window: &DateWindow,
            limit: u32,
            offset: u64,
        ) -> Result<Value, SourceError> {
            self.offsets.lock().unwrap().push(offset);
            let end = (offset + u64::from(limit)).min(self.total);
            let rows: Vec<Value> = (offset..end).map(|n| json!({"id_sale": n})).collect();
            Ok(if self.wrapped {
                json!({"data": rows})
            } else {
                Value::Array(rows)
            })
        }
    }

    fn window() -> DateWindow {
        let start = NaiveDateTime::parse_from_str("2025-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let end = NaiveDateTime::parse_from_str("2025-01-01 23:59:59", "%Y-%m-%d %H:%M:%S").unwrap();
        DateWindow {
            column: "shift_date".into(),
            start,
            end,
        }
    }

    #[tokio::test]
    async fn test_short_page_ends_listing() {
        let source = FakeListing {
            total: 7,
            wrapped: true,
            offsets: Mutex::new(Vec::new()),
        };
        let rows = fetch_window_pages(&source, &window(), 3, 50).await.unwrap();
        assert_eq!(rows.len(), 7);
        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_empty_page_ends_listing() {
        let source = FakeListing {
            total: 6,
            wrapped: false,
            offsets: Mutex::new(Vec::new()),
        };
        let rows = fetch_window_pages(&source, &window(), 3, 50).await.unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_max_pages_caps_listing() {
        let source = FakeListing {
            total: 1_000,
            wrapped: false,
            offsets: Mutex::new(Vec::new()),
        };
        let rows = fetch_window_pages(&source, &window(), 10, 2).await.unwrap();
        assert_eq!(rows.len(), 20);
    }
}
