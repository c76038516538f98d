//! Salesync Worker Library
//!
//! Background pipeline that turns provider sale notifications into
//! normalized order rows in PostgreSQL.
//!
//! # Overview
//!
//! Two stages share one database and never talk to each other directly:
//!
//! - **Ingestion**: claims [`queue::InboxEvent`]s, fetches the order they
//!   name from an [`ingest::OrderSource`] and upserts it into the
//!   [`ingest::RawSnapshotStore`]. Identical content is detected by a
//!   payload fingerprint and does not trigger normalization again.
//! - **Normalization**: claims unnormalized raw snapshots and writes the
//!   customer, order, items, choices, delivery, payments and status history
//!   in a single transaction.
//!
//! Both stages claim work through [`queue::WorkQueue`], which uses
//! `FOR UPDATE SKIP LOCKED` so any number of worker processes can run side
//! by side. Failures are scheduled for retry by a [`queue::RetryPolicy`].
//!
//! # Example
//!
//! ```no_run
//! use salesync_worker::{config::Config, db, ingest::RawSnapshotStore};
//! use salesync_worker::normalize::NormalizationWorker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = RawSnapshotStore::new(pool, config.normalize_retry_policy());
//!     let worker = NormalizationWorker::new(store, config.normalize.batch_size);
//!     let report = worker.process_batch().await?;
//!     println!("normalized {} orders", report.completed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod queue;
pub mod runner;

pub use error::{WorkerError, WorkerResult};
