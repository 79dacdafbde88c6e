//! Durable storage for drained batches.
//!
//! A [`Sink`] receives one key's records at a time. Calls for different keys
//! of the same drain share no mutable state, and a failure is always scoped
//! to the key that produced it.

mod blob_store;

pub use blob_store::{blob_name, ObjectStoreSink};

use crate::config::StorageConfig;
use crate::error::SinkError;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Partition key that was written
    pub key: String,
    /// Where the batch ended up (object path, file, ...)
    pub location: String,
    /// Records written
    pub records: usize,
    /// Payload size in bytes
    pub bytes: usize,
}

/// Durable-storage writer.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Persist all records of one key as a single batch, in the given order.
    async fn write(&self, key: &str, records: &[String]) -> Result<WriteReceipt, SinkError>;

    /// Name for logging.
    fn name(&self) -> &str {
        "sink"
    }
}

/// Create the sink described by the storage configuration.
pub fn create_sink(config: &StorageConfig) -> Result<Arc<dyn Sink>, SinkError> {
    Ok(Arc::new(ObjectStoreSink::from_config(config)?))
}
