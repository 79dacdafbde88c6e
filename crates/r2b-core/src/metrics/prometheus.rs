//! Prometheus text export for flush metrics.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 7] = [100, 250, 500, 1000, 2500, 5000, 10000];

/// Ingestion and flush metrics with counters, gauges, and a histogram.
pub struct FlushMetrics {
    // === COUNTERS ===
    /// Records accepted by the ingestion boundary
    records_ingested_total: AtomicU64,

    /// Non-empty drains performed
    flushes_total: AtomicU64,

    /// Records handed to the sink (successfully or not)
    records_flushed_total: AtomicU64,

    /// Per-key batches the sink persisted
    batches_written_total: AtomicU64,

    /// Per-key batches the sink failed to persist (dropped)
    sink_failures_total: AtomicU64,

    /// Records lost to sink failures
    records_dropped_total: AtomicU64,

    /// Subset of failures caused by the write timeout
    sink_timeouts_total: AtomicU64,

    /// Subset of dropped records lost to a cancelled drain
    records_abandoned_total: AtomicU64,

    /// Flush attempts skipped because another drain was running
    drains_skipped_total: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,
    /// Buckets: [0.1s, 0.25s, 0.5s, 1.0s, 2.5s, 5.0s, 10.0s, +Inf]
    flush_duration_buckets: [AtomicU64; 8],
}

impl FlushMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            records_ingested_total: AtomicU64::new(0),
            flushes_total: AtomicU64::new(0),
            records_flushed_total: AtomicU64::new(0),
            batches_written_total: AtomicU64::new(0),
            sink_failures_total: AtomicU64::new(0),
            records_dropped_total: AtomicU64::new(0),
            sink_timeouts_total: AtomicU64::new(0),
            records_abandoned_total: AtomicU64::new(0),
            drains_skipped_total: AtomicU64::new(0),
            flush_duration_sum_ms: AtomicU64::new(0),
            flush_duration_count: AtomicU64::new(0),
            flush_duration_buckets: Default::default(),
        }
    }

    // === RECORDING ===

    /// Record one ingested record.
    pub fn record_ingested(&self) {
        self.records_ingested_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful per-key write.
    pub fn record_batch_written(&self) {
        self.batches_written_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed per-key write and the records it dropped.
    pub fn record_sink_failure(&self, records: usize, timed_out: bool) {
        self.sink_failures_total.fetch_add(1, Ordering::Relaxed);
        self.records_dropped_total
            .fetch_add(records as u64, Ordering::Relaxed);
        if timed_out {
            self.sink_timeouts_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record records lost because a drain was cancelled mid-write.
    pub fn record_drain_abandoned(&self, records: usize) {
        self.records_dropped_total
            .fetch_add(records as u64, Ordering::Relaxed);
        self.records_abandoned_total
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    /// Record a flush attempt that found a drain already running.
    pub fn record_drain_skipped(&self) {
        self.drains_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed drain with duration histogram.
    pub fn record_flush(&self, records: usize, duration: Duration) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
        self.records_flushed_total
            .fetch_add(records as u64, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn records_ingested_total(&self) -> u64 {
        self.records_ingested_total.load(Ordering::Relaxed)
    }

    pub fn flushes_total(&self) -> u64 {
        self.flushes_total.load(Ordering::Relaxed)
    }

    pub fn records_flushed_total(&self) -> u64 {
        self.records_flushed_total.load(Ordering::Relaxed)
    }

    pub fn batches_written_total(&self) -> u64 {
        self.batches_written_total.load(Ordering::Relaxed)
    }

    pub fn sink_failures_total(&self) -> u64 {
        self.sink_failures_total.load(Ordering::Relaxed)
    }

    pub fn records_dropped_total(&self) -> u64 {
        self.records_dropped_total.load(Ordering::Relaxed)
    }

    pub fn sink_timeouts_total(&self) -> u64 {
        self.sink_timeouts_total.load(Ordering::Relaxed)
    }

    pub fn records_abandoned_total(&self) -> u64 {
        self.records_abandoned_total.load(Ordering::Relaxed)
    }

    pub fn drains_skipped_total(&self) -> u64 {
        self.drains_skipped_total.load(Ordering::Relaxed)
    }

    /// Get flush duration histogram data for Prometheus export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.flush_duration_buckets[i].load(Ordering::Relaxed),
            );
        }
        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.flush_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// `pending_records` is read from the buffer by the caller at export
    /// time, so the gauge is never stale.
    ///
    /// # Example
    /// ```
    /// use r2b_core::metrics::FlushMetrics;
    ///
    /// let metrics = FlushMetrics::new();
    /// metrics.record_ingested();
    /// let text = metrics.export_prometheus_text(0);
    /// assert!(text.contains("r2b_records_ingested_total 1"));
    /// ```
    pub fn export_prometheus_text(&self, pending_records: usize) -> String {
        let mut output = String::with_capacity(2048);

        // === COUNTERS ===
        let counters: [(&str, &str, u64); 9] = [
            (
                "r2b_records_ingested_total",
                "Records accepted for buffering",
                self.records_ingested_total(),
            ),
            (
                "r2b_flushes_total",
                "Non-empty buffer drains",
                self.flushes_total(),
            ),
            (
                "r2b_records_flushed_total",
                "Records handed to the sink",
                self.records_flushed_total(),
            ),
            (
                "r2b_batches_written_total",
                "Per-key batches persisted",
                self.batches_written_total(),
            ),
            (
                "r2b_sink_failures_total",
                "Per-key batches the sink failed to persist",
                self.sink_failures_total(),
            ),
            (
                "r2b_records_dropped_total",
                "Records dropped after a sink failure",
                self.records_dropped_total(),
            ),
            (
                "r2b_sink_timeouts_total",
                "Sink writes that exceeded the write timeout",
                self.sink_timeouts_total(),
            ),
            (
                "r2b_records_abandoned_total",
                "Records dropped because a drain was cancelled mid-write",
                self.records_abandoned_total(),
            ),
            (
                "r2b_drains_skipped_total",
                "Flush attempts skipped while another drain was running",
                self.drains_skipped_total(),
            ),
        ];
        for (name, help, value) in counters {
            write_metric(&mut output, name, help, "counter", value);
        }

        // === GAUGES ===
        write_metric(
            &mut output,
            "r2b_pending_records",
            "Records currently buffered",
            "gauge",
            pending_records as u64,
        );

        // === HISTOGRAM: flush_duration_seconds ===
        let hist = self.flush_duration_histogram();
        output.push_str("# HELP r2b_flush_duration_seconds Duration of buffer flushes\n");
        output.push_str("# TYPE r2b_flush_duration_seconds histogram\n");
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                output,
                "r2b_flush_duration_seconds_bucket{{le=\"{}\"}} {}",
                le, count
            );
        }
        let _ = writeln!(
            output,
            "r2b_flush_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(output, "r2b_flush_duration_seconds_sum {}", hist.sum_seconds);
        let _ = writeln!(output, "r2b_flush_duration_seconds_count {}", hist.count);

        output
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
    let _ = writeln!(output, "{} {}", name, value);
    output.push('\n');
}

impl Default for FlushMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram data for Prometheus export.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 7],
    /// +Inf bucket count
    pub inf_bucket: u64,
}
