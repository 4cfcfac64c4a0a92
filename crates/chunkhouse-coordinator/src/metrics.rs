//! Coordinator Metrics
//!
//! Process-wide Prometheus registry. Counters are updated from the coordinator
//! regardless of whether anything scrapes them; `render()` produces the text
//! exposition format for whoever wants it (the binary dumps it on exit).

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Trigger events received, by event name
    pub static ref TRIGGER_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chunkhouse_trigger_events_total", "Total change events received"),
        &["event_name"]
    ).expect("metric can be created");

    /// Aggregation outcomes, by kind
    pub static ref AGGREGATION_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chunkhouse_aggregation_outcomes_total", "Total aggregation outcomes"),
        &["outcome"] // skipped, already_claimed, incomplete, abandoned, published, transient
    ).expect("metric can be created");

    /// Chunks appended to the downstream stream
    pub static ref CHUNKS_PUBLISHED_TOTAL: IntCounter = IntCounter::new(
        "chunkhouse_chunks_published_total",
        "Total chunks published downstream"
    ).expect("metric can be created");

    /// Parts marked finalized
    pub static ref PARTS_FINALIZED_TOTAL: IntCounter = IntCounter::new(
        "chunkhouse_parts_finalized_total",
        "Total parts marked finalized"
    ).expect("metric can be created");

    /// Stream append retries
    pub static ref PUBLISH_RETRIES_TOTAL: IntCounter = IntCounter::new(
        "chunkhouse_publish_retries_total",
        "Total stream append retries"
    ).expect("metric can be created");

    /// Time from claim to finalize for published chunks
    pub static ref AGGREGATION_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("chunkhouse_aggregation_latency_seconds", "Claim-to-finalize latency in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(TRIGGER_EVENTS_TOTAL.clone()))
            .expect("trigger_events_total can be registered");
        REGISTRY
            .register(Box::new(AGGREGATION_OUTCOMES_TOTAL.clone()))
            .expect("aggregation_outcomes_total can be registered");
        REGISTRY
            .register(Box::new(CHUNKS_PUBLISHED_TOTAL.clone()))
            .expect("chunks_published_total can be registered");
        REGISTRY
            .register(Box::new(PARTS_FINALIZED_TOTAL.clone()))
            .expect("parts_finalized_total can be registered");
        REGISTRY
            .register(Box::new(PUBLISH_RETRIES_TOTAL.clone()))
            .expect("publish_retries_total can be registered");
        REGISTRY
            .register(Box::new(AGGREGATION_LATENCY.clone()))
            .expect("aggregation_latency can be registered");
    });
}

/// Encode every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    init();
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
