//! Raw snapshot normalization
//!
//! [`extract`] turns a payload into a [`NormalizedSale`] using the ordered
//! probes in [`probe`]; [`store`] writes it with replace-on-write child
//! collections; [`NormalizationWorker`] drives both off the raw snapshot queue.

pub mod coerce;
pub mod customer;
pub mod extract;
pub mod probe;
pub mod store;
mod worker;

pub use customer::CustomerKey;
pub use extract::{CustomerCandidate, NormalizedSale};
pub use store::{store_sale, OrderKey, StoredSale};
pub use worker::NormalizationWorker;
