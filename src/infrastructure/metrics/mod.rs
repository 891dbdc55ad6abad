//! Prometheus Metrics Module
//!
//! # Metrics Collected
//! - HTTP request counts and latency by method and matched path
//! - Active stream connections
//! - Messages posted, fan-out deliveries and dropped events
//! - Store retries on transient failures

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "retrocomm";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Authenticated `/stream` connections
pub static STREAM_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "stream_connections_active",
            "Number of authenticated stream connections",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create STREAM_CONNECTIONS_ACTIVE metric")
});

pub static MESSAGES_POSTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_posted_total", "Messages committed by this process")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create MESSAGES_POSTED_TOTAL metric")
});

pub static FANOUT_DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "fanout_deliveries_total",
            "Message frames queued to stream connections",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create FANOUT_DELIVERIES_TOTAL metric")
});

pub static FANOUT_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fanout_dropped_total",
            "Events dropped in favor of a resync",
        )
        .namespace(NAMESPACE),
        &["reason"], // "queue_full", "gap"
    )
    .expect("Failed to create FANOUT_DROPPED_TOTAL metric")
});

pub static STORE_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "store_retries_total",
            "Message posts retried after a transient failure",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create STORE_RETRIES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()),
        Box::new(STREAM_CONNECTIONS_ACTIVE.clone()),
        Box::new(MESSAGES_POSTED_TOTAL.clone()),
        Box::new(FANOUT_DELIVERIES_TOTAL.clone()),
        Box::new(FANOUT_DROPPED_TOTAL.clone()),
        Box::new(STORE_RETRIES_TOTAL.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            tracing::error!(error = %e, "Failed to register metric");
        }
    }
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_message_posted() {
    MESSAGES_POSTED_TOTAL.inc();
}

pub fn record_delivery() {
    FANOUT_DELIVERIES_TOTAL.inc();
}

pub fn record_dropped(reason: &str) {
    FANOUT_DROPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_store_retry() {
    STORE_RETRIES_TOTAL.inc();
}

pub fn stream_connected() {
    STREAM_CONNECTIONS_ACTIVE.inc();
}

pub fn stream_disconnected() {
    STREAM_CONNECTIONS_ACTIVE.dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_series() {
        record_http_request("GET", "/health", 200, 0.001);
        record_dropped("queue_full");
        let metrics = gather_metrics();
        assert!(metrics.contains("retrocomm_http_requests_total"));
        assert!(metrics.contains("retrocomm_fanout_dropped_total"));
    }
}
