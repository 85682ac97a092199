use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub activity_logs_filtered: IntCounter,
    pub activity_logs_queued: IntCounter,
    pub immediate_writes: IntCounter,
    pub immediate_write_failures: IntCounter,
    pub batches_flushed: IntCounter,
    pub entries_persisted: IntCounter,
    pub flush_failures: IntCounter,
    pub queue_length: IntGauge,
    pub flush_duration_seconds: Histogram,
    pub flush_throughput: Gauge,
    pub security_events: IntCounterVec,
    pub security_write_failures: IntCounter,
    pub security_alerts: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let activity_logs_filtered = IntCounter::new("activity_logs_filtered_total", "Activity logs dropped by policy").unwrap();
        let activity_logs_queued = IntCounter::new("activity_logs_queued_total", "Activity logs appended to the batch queue").unwrap();
        let immediate_writes = IntCounter::new("activity_immediate_writes_total", "Unbatched activity log writes").unwrap();
        let immediate_write_failures = IntCounter::new("activity_immediate_write_failures_total", "Unbatched activity log writes that failed").unwrap();
        let batches_flushed = IntCounter::new("activity_batches_flushed_total", "Batches persisted").unwrap();
        let entries_persisted = IntCounter::new("activity_entries_persisted_total", "Entries persisted through batch flushes").unwrap();
        let flush_failures = IntCounter::new("activity_flush_failures_total", "Batch flushes that failed and were re-queued").unwrap();
        let queue_length = IntGauge::new("activity_queue_length", "Entries waiting in the batch queue").unwrap();
        let flush_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("activity_flush_duration_seconds", "Batch persist duration in seconds")
        ).unwrap();
        let flush_throughput = Gauge::new("activity_flush_throughput", "Entries per second of the last successful flush").unwrap();
        let security_events = IntCounterVec::new(
            Opts::new("security_events_total", "Security events recorded"),
            &["severity"],
        ).unwrap();
        let security_write_failures = IntCounter::new("security_write_failures_total", "Security events that failed to persist").unwrap();
        let security_alerts = IntCounter::new("security_alerts_total", "High severity alerts raised").unwrap();

        registry.register(Box::new(activity_logs_filtered.clone())).unwrap();
        registry.register(Box::new(activity_logs_queued.clone())).unwrap();
        registry.register(Box::new(immediate_writes.clone())).unwrap();
        registry.register(Box::new(immediate_write_failures.clone())).unwrap();
        registry.register(Box::new(batches_flushed.clone())).unwrap();
        registry.register(Box::new(entries_persisted.clone())).unwrap();
        registry.register(Box::new(flush_failures.clone())).unwrap();
        registry.register(Box::new(queue_length.clone())).unwrap();
        registry.register(Box::new(flush_duration_seconds.clone())).unwrap();
        registry.register(Box::new(flush_throughput.clone())).unwrap();
        registry.register(Box::new(security_events.clone())).unwrap();
        registry.register(Box::new(security_write_failures.clone())).unwrap();
        registry.register(Box::new(security_alerts.clone())).unwrap();

        Self {
            registry,
            activity_logs_filtered,
            activity_logs_queued,
            immediate_writes,
            immediate_write_failures,
            batches_flushed,
            entries_persisted,
            flush_failures,
            queue_length,
            flush_duration_seconds,
            flush_throughput,
            security_events,
            security_write_failures,
            security_alerts,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or(());
        buffer
    }
}
