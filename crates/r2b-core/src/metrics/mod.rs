//! Ingestion and flush metrics.

mod prometheus;

pub use prometheus::{FlushDurationHistogram, FlushMetrics};
