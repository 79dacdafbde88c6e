//! Keyed in-memory buffer with swap-out drains.
//!
//! The buffer holds one append-only queue of records per partition key. All
//! mutable state (the key map, the total count, the generation id and the
//! last-flush marker) lives behind a single mutex so that a reader always
//! sees them consistently. The lock is only ever held for map operations;
//! draining swaps the whole map out with `std::mem::take` and the caller
//! does its I/O after the lock is released.
//!
//! ## Generations
//!
//! The records held between two drains form a generation. `drain_all()`
//! closes the current generation and opens an empty one in a single
//! critical section, so every `append()` lands entirely in exactly one
//! generation.

use crate::record::{Batch, Record};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// State guarded by the buffer lock.
struct Generation {
    /// key -> records in arrival order
    partitions: HashMap<String, Vec<String>>,
    /// Records across all partitions
    total: usize,
    /// Id of the generation currently accepting appends
    id: u64,
    /// When the last non-empty drain completed
    last_flush: Instant,
}

impl Generation {
    fn new(id: u64, last_flush: Instant) -> Self {
        Self {
            partitions: HashMap::new(),
            total: 0,
            id,
            last_flush,
        }
    }
}

struct BufferStats {
    total_appended: AtomicU64,
    total_drained: AtomicU64,
    drains: AtomicU64,
}

impl BufferStats {
    fn new() -> Self {
        Self {
            total_appended: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
            drains: AtomicU64::new(0),
        }
    }
}

/// Read-only view of the buffer at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSnapshot {
    /// Records currently buffered across all keys
    pub pending: usize,
    /// Distinct keys currently buffered
    pub partitions: usize,
    /// Generation accepting appends
    pub generation: u64,
    /// Time since the last completed flush
    pub since_last_flush: Duration,
}

impl BufferSnapshot {
    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }
}

/// Lifetime buffer statistics.
#[derive(Debug, Clone)]
pub struct PartitionBufferStats {
    /// Records appended since creation
    pub total_appended: u64,
    /// Records handed out by drains since creation
    pub total_drained: u64,
    /// Non-empty drains since creation
    pub drains: u64,
}

/// Concurrent map of per-key record queues.
pub struct PartitionBuffer {
    state: Mutex<Generation>,
    stats: BufferStats,
}

impl PartitionBuffer {
    /// Create an empty buffer. The last-flush marker starts at "now".
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Generation::new(0, Instant::now())),
            stats: BufferStats::new(),
        }
    }

    /// Append a record to the tail of its key's partition.
    ///
    /// Never rejects: growth is bounded only by how often the buffer is drained.
    /// Returns the generation the record landed in.
    pub fn append(&self, key: impl Into<String>, payload: impl Into<String>) -> u64 {
        let key = key.into();
        let payload = payload.into();

        let generation = {
            let mut state = self.state.lock();
            state.partitions.entry(key).or_default().push(payload);
            state.total += 1;
            state.id
        };

        self.stats.total_appended.fetch_add(1, Ordering::Relaxed);
        generation
    }

    /// Append an already-keyed record.
    pub fn push(&self, record: Record) -> u64 {
        self.append(record.key, record.payload)
    }

    /// Close the current generation and return its contents.
    ///
    /// The live map is replaced by an empty one and the count reset in the
    /// same critical section. An empty buffer yields an empty batch and does
    /// not advance the generation.
    pub fn drain_all(&self) -> Batch {
        let (partitions, total, id) = {
            let mut state = self.state.lock();
            if state.total == 0 {
                return Batch::new(state.id, HashMap::new(), 0);
            }
            let partitions = std::mem::take(&mut state.partitions);
            let total = std::mem::replace(&mut state.total, 0);
            let id = state.id;
            state.id += 1;
            (partitions, total, id)
        };

        self.stats.drains.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_drained
            .fetch_add(total as u64, Ordering::Relaxed);

        debug!(
            generation = id,
            records = total,
            keys = partitions.len(),
            "Buffer generation closed"
        );

        Batch::new(id, partitions, total)
    }

    /// Read the current state without mutating it.
    pub fn snapshot(&self) -> BufferSnapshot {
        let state = self.state.lock();
        BufferSnapshot {
            pending: state.total,
            partitions: state.partitions.len(),
            generation: state.id,
            since_last_flush: state.last_flush.elapsed(),
        }
    }

    /// Record that a flush just completed.
    pub fn mark_flushed(&self) {
        self.mark_flushed_at(Instant::now());
    }

    pub(crate) fn mark_flushed_at(&self, at: Instant) {
        self.state.lock().last_flush = at;
    }

    /// Records currently buffered.
    pub fn pending(&self) -> usize {
        self.state.lock().total
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Get buffer statistics.
    pub fn stats(&self) -> PartitionBufferStats {
        PartitionBufferStats {
            total_appended: self.stats.total_appended.load(Ordering::Relaxed),
            total_drained: self.stats.total_drained.load(Ordering::Relaxed),
            drains: self.stats.drains.load(Ordering::Relaxed),
        }
    }
}

impl Default for PartitionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
