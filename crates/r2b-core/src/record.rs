//! Records and drained batches.

use std::collections::HashMap;

/// A single ingested record and the key it was routed to.
///
/// The key is computed once, at ingestion, and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Partition key
    pub key: String,
    /// Raw payload, exactly as received
    pub payload: String,
}

impl Record {
    /// Create a new record.
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// The contents of one closed buffer generation.
///
/// Owned by whoever drained it. Records keep their arrival order within
/// each key; there is no ordering across keys.
#[derive(Debug, Default)]
pub struct Batch {
    generation: u64,
    partitions: HashMap<String, Vec<String>>,
    record_count: usize,
}

impl Batch {
    pub(crate) fn new(
        generation: u64,
        partitions: HashMap<String, Vec<String>>,
        record_count: usize,
    ) -> Self {
        Self {
            generation,
            partitions,
            record_count,
        }
    }

    /// Generation id this batch closed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total records across all keys.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.partitions.len()
    }

    /// Check if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Records for one key, in arrival order.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.partitions.get(key).map(Vec::as_slice)
    }

    /// Keys present in the batch, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.partitions.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Iterate over `(key, records)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.partitions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl IntoIterator for Batch {
    type Item = (String, Vec<String>);
    type IntoIter = std::collections::hash_map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}
