//! Flush policy for the partition buffer.
//!
//! A flush is due when enough records are buffered OR enough time passed
//! since the last flush, whichever comes first.

use crate::config::BufferConfig;
use std::time::Duration;

/// Returns true if `elapsed >= time_threshold` or `total_count >= count_threshold`.
///
/// A zero time threshold makes every call eligible by time; a zero count
/// threshold makes every call eligible by count.
pub fn should_flush(
    total_count: usize,
    elapsed: Duration,
    count_threshold: usize,
    time_threshold: Duration,
) -> bool {
    elapsed >= time_threshold || total_count >= count_threshold
}

/// Why a flush is (or is not) due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// No flush needed
    None,
    /// Record count reached the threshold
    Count,
    /// Time since last flush reached the threshold
    Interval,
}

impl FlushDecision {
    /// Check if this decision requires a flush.
    pub fn requires_flush(&self) -> bool {
        !matches!(self, FlushDecision::None)
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushDecision::None => "none",
            FlushDecision::Count => "count",
            FlushDecision::Interval => "interval",
        }
    }
}

/// Count and time thresholds. Stateless and freely shareable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush when at least this many records are buffered
    pub count_threshold: usize,
    /// Flush when at least this long passed since the last flush
    pub time_threshold: Duration,
}

impl FlushPolicy {
    /// Create a policy from explicit thresholds.
    pub fn new(count_threshold: usize, time_threshold: Duration) -> Self {
        Self {
            count_threshold,
            time_threshold,
        }
    }

    /// Build the policy from buffer configuration.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.max_lines_per_flush, config.flush_interval())
    }

    /// Evaluate the buffer state against the thresholds.
    pub fn should_flush(&self, total_count: usize, elapsed: Duration) -> bool {
        should_flush(
            total_count,
            elapsed,
            self.count_threshold,
            self.time_threshold,
        )
    }

    /// Like [`should_flush`](Self::should_flush) but reports which threshold fired.
    /// Count wins when both are reached.
    pub fn evaluate(&self, total_count: usize, elapsed: Duration) -> FlushDecision {
        if total_count >= self.count_threshold {
            FlushDecision::Count
        } else if elapsed >= self.time_threshold {
            FlushDecision::Interval
        } else {
            FlushDecision::None
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::from_config(&BufferConfig::default())
    }
}
