//! R2B Core - keyed record buffering with batched blob uploads
//!
//! This library accepts a stream of text records, groups them in memory by a
//! partition key derived from each record, and periodically writes every
//! key's records to durable storage as one blob per key with:
//!
//! - Count and time flush triggers plus a fixed-cadence timer
//! - Drains that never block appends for the duration of sink I/O
//! - Per-key failure isolation (a failed key never blocks the others)
//! - Health, status and Prometheus metrics for operators

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod key;
pub mod metrics;
pub mod record;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use engine::{FlushCoordinator, FlushOutcome, FlushReport, IngestionEngine};
pub use error::SinkError;
pub use error::{Error, Result};
pub use key::{DelimitedKeyExtractor, KeyExtractor};
pub use record::{Batch, Record};
pub use sink::{Sink, WriteReceipt};
