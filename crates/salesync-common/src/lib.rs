//! Salesync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the salesync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Checksums**: content fingerprints for raw provider payloads
//! - **Logging**: centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use salesync_common::checksum::payload_fingerprint;
//! use serde_json::json;
//!
//! fn main() -> salesync_common::Result<()> {
//!     let hash = payload_fingerprint(&json!({ "id_sale": 42 }))?;
//!     assert_eq!(hash.len(), 64);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
