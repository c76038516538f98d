//! Ingestion stage
//!
//! Inbox events name an order; the worker fetches it from an [`OrderSource`]
//! and hands the payload to the [`RawSnapshotStore`], which decides whether
//! the order needs normalizing again.

pub mod raw_store;
pub mod source;
mod worker;

pub use raw_store::{RawOrder, RawSnapshotStore, UpsertKind, UpsertOutcome};
pub use source::{
    extract_page_rows, fetch_window_pages, DateWindow, OrderSource, PagedSource, SourceError,
};
pub use worker::IngestionWorker;
