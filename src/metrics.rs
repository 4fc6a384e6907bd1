//! Prometheus metrics for the query path
//!
//! Counts queries by kind and outcome, times their execution, and tracks
//! table loads and batch sizes.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total queries executed, by kind and status
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "metrics_query_queries_total",
        "Total metrics queries executed",
        &["kind", "status"]
    ).unwrap();

    /// Query execution duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "metrics_query_duration_seconds",
        "Metrics query latency in seconds",
        &["kind"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Time-series table loads performed by the table cache
    pub static ref TABLE_LOADS_TOTAL: CounterVec = register_counter_vec!(
        "metrics_query_table_loads_total",
        "Time-series table constructions",
        &["status"]
    ).unwrap();

    /// Number of URIs per batch call
    pub static ref BATCH_ITEMS: Histogram = register_histogram!(
        "metrics_query_batch_items",
        "Number of queries in one batch call",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();
}

/// Record one executed query
pub fn record_query(kind: &str, success: bool, elapsed_secs: f64) {
    let status = if success { "ok" } else { "error" };
    QUERIES_TOTAL.with_label_values(&[kind, status]).inc();
    QUERY_DURATION.with_label_values(&[kind]).observe(elapsed_secs);
}

/// Record one table construction
pub fn record_table_load(success: bool) {
    let status = if success { "ok" } else { "error" };
    TABLE_LOADS_TOTAL.with_label_values(&[status]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
