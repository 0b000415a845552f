//! Prometheus metrics for the pipeline
//!
//! One [`PipelineMetrics`] is built per process against an explicit
//! [`Registry`] and handed to every component that records into it.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the queue to subscriber pipeline
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Change records per queue message
    pub records_per_message: Histogram,

    /// Lines broadcast per object
    pub events_per_object: Histogram,

    /// Age of notifications when they are processed
    pub notification_delay_seconds: Histogram,

    /// `event` records sent to subscribers
    pub event_sends_total: IntCounter,

    /// `ping` records sent to subscribers
    pub ping_sends_total: IntCounter,

    /// Records dropped because a subscriber buffer was full
    pub dropped_events_total: IntCounter,

    /// Connected subscribers
    pub active_connections: IntGauge,

    /// Approximate number of visible queue messages
    pub queue_backlog: IntGauge,

    /// Processed queue messages (labeled by outcome)
    pub messages_total: IntCounterVec,

    /// Queue messages acknowledged
    pub messages_deleted_total: IntCounter,

    /// Failed acknowledgements
    pub delete_failures_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl PipelineMetrics {
    /// Create new metrics with a custom registry
    pub fn new(registry: Registry) -> Result<Self, prometheus::Error> {
        let records_per_message = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_records_per_message",
                "Number of change records in each queue message",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        )?;

        let events_per_object = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_events_per_object",
                "Number of lines broadcast from each object",
            )
            .buckets(prometheus::exponential_buckets(1.0, 4.0, 10)?),
        )?;

        let notification_delay_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pipeline_notification_delay_seconds",
                "Time between notification publish and processing",
            )
            .buckets(vec![
                0.1, 0.5, 1.0, 2.5, 5.0, // sub-second to 5s
                10.0, 30.0, 60.0, 300.0, 900.0, // backlog territory
            ]),
        )?;

        let event_sends_total = IntCounter::new(
            "pipeline_event_sends_total",
            "Total event records sent to subscribers",
        )?;

        let ping_sends_total = IntCounter::new(
            "pipeline_ping_sends_total",
            "Total heartbeat pings sent to subscribers",
        )?;

        let dropped_events_total = IntCounter::new(
            "pipeline_dropped_events_total",
            "Total records dropped for slow subscribers",
        )?;

        let active_connections = IntGauge::new(
            "pipeline_active_connections",
            "Number of connected SSE subscribers",
        )?;

        let queue_backlog = IntGauge::new(
            "pipeline_queue_backlog",
            "Approximate number of messages waiting in the queue",
        )?;

        let messages_total = IntCounterVec::new(
            Opts::new(
                "pipeline_messages_total",
                "Total queue messages processed",
            ),
            &["outcome"],
        )?;

        let messages_deleted_total = IntCounter::new(
            "pipeline_messages_deleted_total",
            "Total queue messages deleted after processing",
        )?;

        let delete_failures_total = IntCounter::new(
            "pipeline_delete_failures_total",
            "Total failed queue message deletions",
        )?;

        // Register all metrics
        registry.register(Box::new(records_per_message.clone()))?;
        registry.register(Box::new(events_per_object.clone()))?;
        registry.register(Box::new(notification_delay_seconds.clone()))?;
        registry.register(Box::new(event_sends_total.clone()))?;
        registry.register(Box::new(ping_sends_total.clone()))?;
        registry.register(Box::new(dropped_events_total.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(queue_backlog.clone()))?;
        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(messages_deleted_total.clone()))?;
        registry.register(Box::new(delete_failures_total.clone()))?;

        Ok(Self {
            records_per_message,
            events_per_object,
            notification_delay_seconds,
            event_sends_total,
            ping_sends_total,
            dropped_events_total,
            active_connections,
            queue_backlog,
            messages_total,
            messages_deleted_total,
            delete_failures_total,
            registry: Arc::new(registry),
        })
    }

    /// Create with a fresh registry
    pub fn with_default_registry() -> Result<Self, prometheus::Error> {
        Self::new(Registry::new())
    }

    /// Record the outcome label of a processed queue message
    pub fn record_outcome(&self, outcome: &str) {
        self.messages_total.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
