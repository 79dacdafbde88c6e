//! Flush coordination: decide, drain, write.
//!
//! The coordinator is either idle or draining. A flush request that arrives
//! while a drain is running returns [`FlushOutcome::InProgress`] right away
//! instead of queueing a second drain; the running drain already covers
//! everything that was buffered when it started, and anything appended
//! after that belongs to the next generation.
//!
//! ## Delivery
//!
//! Delivery to the sink is at-most-once. A key whose write fails or times
//! out is logged, counted, and dropped: it is never re-buffered and the
//! other keys of the same drain are still written. The last-flush marker is
//! reset after every non-empty drain regardless of failures, so a sink that
//! keeps failing loses data at every flush interval. That loss shows up in
//! [`FlushReport::records_dropped`], the `r2b_records_dropped_total`
//! counter, and a degraded `sink` health component.
//!
//! Records taken out of the buffer are counted as in flight until their
//! key's write resolves. If the drain future is dropped first (shutdown
//! timeout, aborted task) whatever is still in flight is counted as dropped
//! and logged.

use crate::buffer::{FlushDecision, FlushPolicy, PartitionBuffer};
use crate::error::SinkError;
use crate::health::{Component, HealthCheck};
use crate::metrics::FlushMetrics;
use crate::sink::{Sink, WriteReceipt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Policy check after an ingested record
    Record(FlushDecision),
    /// Periodic timer
    Timer,
    /// Final flush on shutdown
    Shutdown,
    /// Explicit caller request
    Manual,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Record(FlushDecision::Count) => "count",
            FlushTrigger::Record(FlushDecision::Interval) => "interval",
            FlushTrigger::Record(FlushDecision::None) => "record",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Manual => "manual",
        }
    }
}

/// Result of writing one key's records.
#[derive(Debug, Clone)]
pub struct KeyWriteOutcome {
    /// Partition key
    pub key: String,
    /// Records in the key's batch
    pub records: usize,
    /// Sink result (timeouts are reported as [`SinkError::Timeout`])
    pub result: Result<WriteReceipt, SinkError>,
}

impl KeyWriteOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of one completed drain.
#[derive(Debug, Clone)]
pub struct FlushReport {
    /// Generation that was closed
    pub generation: u64,
    /// What started the flush
    pub trigger: FlushTrigger,
    /// Records drained
    pub records: usize,
    /// One entry per key, in write order
    pub outcomes: Vec<KeyWriteOutcome>,
    /// Wall time for the whole pass
    pub duration: Duration,
}

impl FlushReport {
    /// Keys written successfully.
    pub fn keys_written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Keys whose write failed.
    pub fn keys_failed(&self) -> usize {
        self.outcomes.len() - self.keys_written()
    }

    /// Records lost to failed writes.
    pub fn records_dropped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.records)
            .sum()
    }

    /// Check if every key was written.
    pub fn is_clean(&self) -> bool {
        self.keys_failed() == 0
    }

    /// Failures only.
    pub fn failures(&self) -> impl Iterator<Item = &KeyWriteOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Result of a flush request.
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Policy says no flush is due
    NotDue,
    /// Nothing buffered; the last-flush marker was left alone
    Empty,
    /// Another drain is running; this request did nothing
    InProgress,
    /// A drain ran
    Flushed(FlushReport),
}

impl FlushOutcome {
    /// The report, if a drain ran.
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            FlushOutcome::Flushed(report) => Some(report),
            _ => None,
        }
    }

    pub fn is_flushed(&self) -> bool {
        matches!(self, FlushOutcome::Flushed(_))
    }
}

/// Clears the draining flag when dropped, including on cancellation.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Accounts for records still in flight when a drain is cancelled.
struct InFlightGuard<'a> {
    remaining: &'a AtomicUsize,
    metrics: &'a FlushMetrics,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let lost = self.remaining.swap(0, Ordering::AcqRel);
        if lost > 0 {
            self.metrics.record_drain_abandoned(lost);
            error!(
                generation = self.generation,
                records = lost,
                "Drain cancelled before all writes finished, records dropped"
            );
        }
    }
}

/// Orchestrates policy checks, drains, and sink writes.
pub struct FlushCoordinator {
    buffer: Arc<PartitionBuffer>,
    policy: FlushPolicy,
    sink: Arc<dyn Sink>,
    write_timeout: Duration,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    metrics: Arc<FlushMetrics>,
    health: Arc<HealthCheck>,
}

impl FlushCoordinator {
    /// Create a coordinator with fresh metrics and health tracking.
    pub fn new(
        buffer: Arc<PartitionBuffer>,
        policy: FlushPolicy,
        sink: Arc<dyn Sink>,
        write_timeout: Duration,
    ) -> Self {
        Self::with_observers(
            buffer,
            policy,
            sink,
            write_timeout,
            Arc::new(FlushMetrics::new()),
            Arc::new(HealthCheck::new()),
        )
    }

    /// Create a coordinator reporting into shared metrics and health.
    pub fn with_observers(
        buffer: Arc<PartitionBuffer>,
        policy: FlushPolicy,
        sink: Arc<dyn Sink>,
        write_timeout: Duration,
        metrics: Arc<FlushMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        Self {
            buffer,
            policy,
            sink,
            write_timeout,
            draining: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            metrics,
            health,
        }
    }

    /// Check whether [`maybe_flush`](Self::maybe_flush) would drain right now.
    ///
    /// Only reads the buffer; lets callers skip spawning a flush task.
    pub fn is_flush_due(&self) -> bool {
        if self.is_draining() {
            return false;
        }
        let snapshot = self.buffer.snapshot();
        !snapshot.is_empty()
            && self
                .policy
                .evaluate(snapshot.pending, snapshot.since_last_flush)
                .requires_flush()
    }

    /// Flush if the policy says so. No side effects when nothing is due.
    pub async fn maybe_flush(&self) -> FlushOutcome {
        // Skip before touching the buffer lock.
        if self.is_draining() {
            self.metrics.record_drain_skipped();
            return FlushOutcome::InProgress;
        }

        let snapshot = self.buffer.snapshot();
        let decision = self
            .policy
            .evaluate(snapshot.pending, snapshot.since_last_flush);

        if !decision.requires_flush() {
            return FlushOutcome::NotDue;
        }

        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        debug!(
            reason = decision.as_str(),
            pending = snapshot.pending,
            since_last_flush_s = snapshot.since_last_flush.as_secs(),
            "Flush due"
        );
        self.drain(FlushTrigger::Record(decision)).await
    }

    /// Flush whatever is buffered, regardless of thresholds.
    pub async fn force_flush(&self) -> FlushOutcome {
        self.force_flush_with(FlushTrigger::Manual).await
    }

    pub(crate) async fn force_flush_with(&self, trigger: FlushTrigger) -> FlushOutcome {
        if self.buffer.is_empty() {
            return FlushOutcome::Empty;
        }
        self.drain(trigger).await
    }

    /// Close the current generation and write every key to the sink.
    pub async fn drain(&self, trigger: FlushTrigger) -> FlushOutcome {
        let Some(_guard) = self.try_begin_drain() else {
            self.metrics.record_drain_skipped();
            debug!(trigger = trigger.as_str(), "Drain already in progress, skipping");
            return FlushOutcome::InProgress;
        };

        let batch = self.buffer.drain_all();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let start = Instant::now();
        let generation = batch.generation();
        let records = batch.record_count();
        let mut outcomes = Vec::with_capacity(batch.key_count());

        self.in_flight.store(records, Ordering::Release);
        let _in_flight = InFlightGuard {
            remaining: &self.in_flight,
            metrics: &self.metrics,
            generation,
        };

        // Buffer lock is not held here; appends go to the next generation.
        for (key, key_records) in batch {
            let result = self.write_key(&key, &key_records).await;
            self.in_flight
                .fetch_sub(key_records.len(), Ordering::AcqRel);
            match &result {
                Ok(receipt) => {
                    self.metrics.record_batch_written();
                    info!(
                        key = %key,
                        records = key_records.len(),
                        location = %receipt.location,
                        "Uploaded batch"
                    );
                }
                Err(e) => {
                    self.metrics
                        .record_sink_failure(key_records.len(), e.is_timeout());
                    error!(
                        key = %key,
                        records = key_records.len(),
                        error = %e,
                        "Batch write failed, records dropped"
                    );
                }
            }
            outcomes.push(KeyWriteOutcome {
                key,
                records: key_records.len(),
                result,
            });
        }

        self.buffer.mark_flushed();

        let report = FlushReport {
            generation,
            trigger,
            records,
            outcomes,
            duration: start.elapsed(),
        };

        self.metrics.record_flush(records, report.duration);
        self.update_sink_health(&report);

        if report.is_clean() {
            info!(
                generation,
                trigger = trigger.as_str(),
                records,
                keys = report.outcomes.len(),
                duration_ms = %report.duration.as_millis(),
                "Buffer flushed"
            );
        } else {
            warn!(
                generation,
                trigger = trigger.as_str(),
                records,
                keys = report.outcomes.len(),
                keys_failed = report.keys_failed(),
                records_dropped = report.records_dropped(),
                duration_ms = %report.duration.as_millis(),
                "Buffer flushed with failures"
            );
        }

        FlushOutcome::Flushed(report)
    }

    async fn write_key(&self, key: &str, records: &[String]) -> Result<WriteReceipt, SinkError> {
        match tokio::time::timeout(self.write_timeout, self.sink.write(key, records)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                key: key.to_string(),
                timeout_ms: self.write_timeout.as_millis() as u64,
            }),
        }
    }

    fn update_sink_health(&self, report: &FlushReport) {
        if report.is_clean() {
            self.health.mark_healthy(Component::Sink);
        } else if report.keys_written() == 0 {
            self.health.mark_unhealthy(
                Component::Sink,
                format!("all {} keys failed in last flush", report.outcomes.len()),
            );
        } else {
            self.health.mark_degraded(
                Component::Sink,
                format!(
                    "{} of {} keys failed in last flush",
                    report.keys_failed(),
                    report.outcomes.len()
                ),
            );
        }
    }

    fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| DrainGuard {
                flag: &self.draining,
            })
    }

    /// Check if a drain is running right now.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Records drained by the running drain whose write has not resolved.
    pub fn in_flight_records(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> &Arc<PartitionBuffer> {
        &self.buffer
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<FlushMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }
}
