//! Partitioned record buffer and its flush policy.
//!
//! Records are grouped by partition key in memory until the policy says a
//! flush is due, then the whole generation is swapped out in one step and
//! written per key by the flush coordinator.

mod partition_buffer;
mod policy;

pub use partition_buffer::{BufferSnapshot, PartitionBuffer, PartitionBufferStats};
pub use policy::{should_flush, FlushDecision, FlushPolicy};
