//! Main ingestion engine orchestration.
//!
//! Wires the pieces together:
//! - A [`RecordSource`] feeding raw records
//! - A [`KeyExtractor`] routing each record to a partition key
//! - The [`PartitionBuffer`](crate::buffer::PartitionBuffer) holding records per key
//! - A [`FlushCoordinator`] deciding when to drain and writing to the [`Sink`]
//! - A [`FlushTimer`] forcing flushes on a fixed cadence
//!
//! Inside [`IngestionEngine::run`] a due flush is spawned onto its own task,
//! so the source keeps being read while the sink is written. At most one
//! such task is outstanding; the drain guard covers races with the timer.
//!
//! On shutdown the timer is stopped and whatever is still buffered gets one
//! final flush, bounded by `engine.shutdown_timeout_seconds`.

use super::coordinator::{FlushCoordinator, FlushOutcome, FlushTrigger};
use super::source::RecordSource;
use super::timer::FlushTimer;
use super::shutdown_requested;
use crate::buffer::{FlushPolicy, PartitionBuffer};
use crate::config::Config;
use crate::health::{Component, HealthCheck, StatusReport};
use crate::key::{DelimitedKeyExtractor, KeyExtractor};
use crate::metrics::FlushMetrics;
use crate::record::Record;
use crate::sink::{create_sink, Sink};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cloneable handle that asks a running engine to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        shutdown_requested(&mut rx).await;
    }
}

/// Main ingestion engine.
pub struct IngestionEngine {
    config: Config,
    coordinator: Arc<FlushCoordinator>,
    extractor: Arc<dyn KeyExtractor>,
    metrics: Arc<FlushMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl IngestionEngine {
    /// Create an engine writing to the sink named by `config.storage`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let sink = create_sink(&config.storage)?;
        Self::with_components(config, sink, Arc::new(DelimitedKeyExtractor))
    }

    /// Create an engine with an explicit sink.
    pub fn with_sink(config: Config, sink: Arc<dyn Sink>) -> Result<Self> {
        Self::with_components(config, sink, Arc::new(DelimitedKeyExtractor))
    }

    /// Create an engine with an explicit sink and key extractor.
    pub fn with_components(
        config: Config,
        sink: Arc<dyn Sink>,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(FlushMetrics::new());
        let health = Arc::new(HealthCheck::new());
        health.mark_healthy(Component::Buffer);

        let policy = FlushPolicy::from_config(&config.buffer);
        info!(
            sink = sink.name(),
            max_lines_per_flush = policy.count_threshold,
            flush_interval_s = policy.time_threshold.as_secs(),
            timer_interval_s = config.buffer.timer_interval_seconds,
            write_timeout_ms = config.storage.write_timeout_ms,
            "Ingestion engine configured"
        );

        let coordinator = Arc::new(FlushCoordinator::with_observers(
            Arc::new(PartitionBuffer::new()),
            policy,
            sink,
            config.storage.write_timeout(),
            Arc::clone(&metrics),
            Arc::clone(&health),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            coordinator,
            extractor,
            metrics,
            health,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    /// Accept one raw record: key it, buffer it, then run the policy check.
    ///
    /// The record is buffered before the check, so it is part of any drain
    /// the check starts. Never fails; sink errors surface in the outcome.
    pub async fn ingest(&self, raw: &str) -> FlushOutcome {
        self.accept(raw);
        self.coordinator.maybe_flush().await
    }

    fn accept(&self, raw: &str) {
        let key = self.extractor.extract_key(raw);
        debug!(key = %key, "Received record");

        self.coordinator.buffer().push(Record::new(key, raw));
        self.metrics.record_ingested();
    }

    fn spawn_flush(&self) -> JoinHandle<FlushOutcome> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.maybe_flush().await })
    }

    /// Consume `source` until it ends, fails, or shutdown is requested.
    ///
    /// Runs the flush timer alongside and always finishes with a final
    /// flush. A source error is returned after that flush.
    pub async fn run<S: RecordSource>(&self, mut source: S) -> Result<()> {
        self.health.set_running(true);
        self.health.mark_healthy(Component::Source);
        info!(source = %source.describe(), "Ingestion engine started");

        let timer = FlushTimer::new(
            Arc::clone(&self.coordinator),
            self.config.buffer.timer_interval(),
        )
        .spawn(self.shutdown_tx.subscribe());

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut in_flight: Option<JoinHandle<FlushOutcome>> = None;

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                    break Ok(());
                }

                next = source.next_record() => match next {
                    Ok(Some(raw)) => {
                        self.accept(&raw);
                        let idle = in_flight.as_ref().map_or(true, JoinHandle::is_finished);
                        if idle && self.coordinator.is_flush_due() {
                            in_flight = Some(self.spawn_flush());
                        }
                    }
                    Ok(None) => {
                        info!(source = %source.describe(), "Source exhausted");
                        break Ok(());
                    }
                    Err(e) => {
                        error!(error = %e, "Source failed, stopping ingestion");
                        self.health.mark_unhealthy(Component::Source, e.to_string());
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown_handle().trigger();
        self.finish(timer, in_flight).await;
        self.health.set_running(false);

        result
    }

    async fn finish(
        &self,
        mut timer: JoinHandle<()>,
        mut in_flight: Option<JoinHandle<FlushOutcome>>,
    ) {
        let budget = Duration::from_secs(self.config.engine.shutdown_timeout_seconds);
        let abandoned_before = self.metrics.records_abandoned_total();
        info!(
            timeout_s = budget.as_secs(),
            pending = self.coordinator.buffer().pending(),
            in_flight = self.coordinator.in_flight_records(),
            "Shutting down ingestion engine"
        );

        let final_flush = async {
            // Let running timer or record-triggered drains finish first.
            let _ = (&mut timer).await;
            if let Some(handle) = in_flight.as_mut() {
                let _ = handle.await;
            }
            self.coordinator
                .force_flush_with(FlushTrigger::Shutdown)
                .await
        };

        let outcome = tokio::time::timeout(budget, final_flush).await;
        match outcome {
            Ok(FlushOutcome::Flushed(report)) => {
                info!(
                    records = report.records,
                    keys = report.outcomes.len(),
                    records_dropped = report.records_dropped(),
                    "Final flush completed"
                );
            }
            Ok(_) => {
                info!("Nothing left to flush");
            }
            Err(_) => {
                // Cancelled drains account for their own records on drop.
                cancel(&mut timer).await;
                if let Some(handle) = in_flight.as_mut() {
                    cancel(handle).await;
                }

                let leftover = self.coordinator.buffer().drain_all().record_count();
                if leftover > 0 {
                    self.metrics.record_drain_abandoned(leftover);
                }

                let dropped = self.metrics.records_abandoned_total() - abandoned_before;
                warn!(
                    timeout_s = budget.as_secs(),
                    records_dropped = dropped,
                    never_drained = leftover,
                    "Shutdown timeout exceeded, remaining records lost"
                );
            }
        }

        info!("Ingestion engine shut down complete");
    }

    /// Read-only status for the health endpoint.
    pub fn status(&self) -> StatusReport {
        StatusReport::new(
            &self.coordinator.buffer().snapshot(),
            self.coordinator.policy(),
            &self.health,
        )
    }

    /// Get a handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<FlushCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<FlushMetrics> {
        &self.metrics
    }

    /// Prometheus text with the pending gauge read from the buffer.
    pub fn metrics_text(&self) -> String {
        self.metrics
            .export_prometheus_text(self.coordinator.buffer().pending())
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }
}

// Abort `handle` and wait until its future has been dropped.
async fn cancel<T>(handle: &mut JoinHandle<T>) {
    if !handle.is_finished() {
        handle.abort();
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LineSource;
    use crate::error::SinkError;
    use crate::sink::{ObjectStoreSink, WriteReceipt};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Notify};

    /// Parks every write until the gate is opened.
    struct GatedSink {
        entered: Notify,
        open: watch::Sender<bool>,
    }

    impl GatedSink {
        fn new() -> Self {
            Self {
                entered: Notify::new(),
                open: watch::channel(false).0,
            }
        }
    }

    #[async_trait]
    impl Sink for GatedSink {
        async fn write(
            &self,
            key: &str,
            records: &[String],
        ) -> std::result::Result<WriteReceipt, SinkError> {
            self.entered.notify_one();
            let mut open = self.open.subscribe();
            let _ = open.wait_for(|open| *open).await;
            Ok(WriteReceipt {
                key: key.to_string(),
                location: key.to_string(),
                records: records.len(),
                bytes: 0,
            })
        }
    }

    /// Yields its records, then fails.
    struct FailingSource {
        records: Vec<String>,
    }

    #[async_trait]
    impl RecordSource for FailingSource {
        async fn next_record(&mut self) -> Result<Option<String>> {
            match self.records.pop() {
                Some(record) => Ok(Some(record)),
                None => Err(crate::Error::Source("connection reset".into())),
            }
        }
    }

    fn config(max_lines: usize) -> Config {
        let mut config = Config::default();
        config.buffer.max_lines_per_flush = max_lines;
        config.buffer.flush_interval_seconds = 3600;
        config.buffer.timer_interval_seconds = 3600;
        config.storage.location = "memory://".into();
        config
    }

    fn engine(max_lines: usize) -> IngestionEngine {
        IngestionEngine::with_sink(config(max_lines), Arc::new(ObjectStoreSink::in_memory()))
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config(10);
        config.storage.write_timeout_ms = 0;
        let result = IngestionEngine::with_sink(config, Arc::new(ObjectStoreSink::in_memory()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ingest_buffers_then_flushes_on_count() {
        let engine = engine(3);

        assert!(matches!(engine.ingest("1, g1, a").await, FlushOutcome::NotDue));
        assert!(matches!(engine.ingest("2, g2, b").await, FlushOutcome::NotDue));
        assert_eq!(engine.status().pending_records, 2);
        assert_eq!(engine.status().partitions, 2);

        let outcome = engine.ingest("3, g1, c").await;
        let report = outcome.report().unwrap();
        assert_eq!(report.records, 3);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(engine.status().pending_records, 0);
        assert_eq!(engine.metrics().records_ingested_total(), 3);
    }

    #[tokio::test]
    async fn test_custom_extractor() {
        let engine = IngestionEngine::with_components(
            config(1000),
            Arc::new(ObjectStoreSink::in_memory()),
            Arc::new(|raw: &str| raw.len().to_string()),
        )
        .unwrap();

        engine.ingest("abc").await;
        engine.ingest("xyz").await;
        engine.ingest("hello").await;

        let batch = engine.coordinator().buffer().drain_all();
        assert_eq!(batch.get("3").unwrap(), &["abc", "xyz"]);
        assert_eq!(batch.get("5").unwrap(), &["hello"]);
    }

    #[tokio::test]
    async fn test_run_flushes_remaining_records_at_end_of_input() {
        let engine = engine(1000);
        let input: &[u8] = b"1, g1, a\n2, g1, b\n, g2, c\nmalformed\n";

        engine.run(LineSource::new(input, "test")).await.unwrap();

        assert_eq!(engine.coordinator().buffer().pending(), 0);
        assert_eq!(engine.metrics().flushes_total(), 1);
        // g1-1, g1-2, error-data, invalid-data
        assert_eq!(engine.metrics().batches_written_total(), 4);
        assert!(!engine.health().is_running());
        assert!(engine.shutdown_handle().is_triggered());
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_run() {
        let engine = Arc::new(engine(1000));
        let (tx, rx) = mpsc::channel(16);

        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(rx).await })
        };

        tx.send("1, g1, a".to_string()).await.unwrap();
        tx.send("2, g2, b".to_string()).await.unwrap();
        while engine.metrics().records_ingested_total() < 2 {
            tokio::task::yield_now().await;
        }

        engine.shutdown_handle().trigger();
        runner.await.unwrap().unwrap();

        assert_eq!(engine.coordinator().buffer().pending(), 0);
        assert_eq!(engine.metrics().records_flushed_total(), 2);
        // Sender still alive: the run ended because of the signal.
        drop(tx);
    }

    #[tokio::test]
    async fn test_shutdown_handle_wakes_waiters() {
        let engine = engine(1000);
        let handle = engine.shutdown_handle();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.triggered().await })
        };
        assert!(!handle.is_triggered());

        handle.trigger();
        handle.trigger();
        waiter.await.unwrap();
        assert!(engine.shutdown_handle().is_triggered());
    }

    #[tokio::test]
    async fn test_undecodable_line_does_not_stop_run() {
        let engine = engine(1000);
        let input: &[u8] = b"1, g1, a\n\xff\xfe\n2, g1, b\n3, g1, c\n";

        engine.run(LineSource::new(input, "mixed")).await.unwrap();

        assert_eq!(engine.metrics().records_ingested_total(), 4);
        assert_eq!(engine.metrics().records_flushed_total(), 4);
        // g1-1, g1-2, g1-3, invalid-data
        assert_eq!(engine.metrics().batches_written_total(), 4);
        assert_eq!(
            engine.health().status_of(Component::Source),
            crate::health::ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_ingestion_continues_while_drain_is_parked() {
        let sink = Arc::new(GatedSink::new());
        let engine = Arc::new(IngestionEngine::with_sink(config(1), sink.clone()).unwrap());
        let (tx, rx) = mpsc::channel(16);

        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.run(rx).await })
        };

        tx.send("1, g1, a".to_string()).await.unwrap();
        sink.entered.notified().await;

        for i in 2..=6 {
            tx.send(format!("{}, g1, x", i)).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.metrics().records_ingested_total() < 6 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("records must be ingested while the sink is parked");

        assert!(engine.coordinator().is_draining());
        assert_eq!(engine.coordinator().in_flight_records(), 1);
        assert_eq!(engine.coordinator().buffer().pending(), 5);

        sink.open.send_replace(true);
        engine.shutdown_handle().trigger();
        runner.await.unwrap().unwrap();

        assert_eq!(engine.metrics().records_flushed_total(), 6);
        assert_eq!(engine.coordinator().buffer().pending(), 0);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout_counts_lost_records() {
        struct StalledSink;

        #[async_trait]
        impl Sink for StalledSink {
            async fn write(
                &self,
                key: &str,
                _records: &[String],
            ) -> std::result::Result<WriteReceipt, SinkError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(SinkError::WriteFailed {
                    key: key.to_string(),
                    message: "stalled".into(),
                })
            }
        }

        let mut config = config(1000);
        config.storage.write_timeout_ms = 120_000;
        config.engine.shutdown_timeout_seconds = 1;
        let engine = IngestionEngine::with_sink(config, Arc::new(StalledSink)).unwrap();

        let input: &[u8] = b"1, g1, a\n2, g1, b\n3, g2, c\n";
        engine.run(LineSource::new(input, "stalled")).await.unwrap();

        assert_eq!(engine.metrics().records_ingested_total(), 3);
        assert_eq!(engine.metrics().records_flushed_total(), 0);
        assert_eq!(engine.metrics().records_dropped_total(), 3);
        assert_eq!(engine.metrics().records_abandoned_total(), 3);
        assert_eq!(engine.coordinator().buffer().pending(), 0);
        assert_eq!(engine.coordinator().in_flight_records(), 0);
        assert!(!engine.coordinator().is_draining());
    }

    #[tokio::test]
    async fn test_metrics_text_reads_pending_from_buffer() {
        let engine = engine(1000);
        engine.ingest("1, g1, a").await;
        engine.ingest("2, g1, b").await;
        assert!(engine.metrics_text().contains("r2b_pending_records 2"));

        engine.coordinator().force_flush().await;
        assert!(engine.metrics_text().contains("r2b_pending_records 0"));
    }

    #[tokio::test]
    async fn test_source_error_is_returned_after_final_flush() {
        let engine = engine(1000);
        let source = FailingSource {
            records: vec!["1, g1, a".to_string()],
        };

        let result = engine.run(source).await;
        assert!(matches!(result, Err(crate::Error::Source(_))));
        assert_eq!(engine.metrics().records_flushed_total(), 1);
        assert!(matches!(
            engine.health().status_of(Component::Source),
            crate::health::ComponentStatus::Unhealthy(_)
        ));
    }
}
