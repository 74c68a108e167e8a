/// Prometheus metrics for the CratePilot backend
///
/// Covers HTTP traffic, gate rejections, cache effectiveness and import jobs.
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Gates ==========

    /// Requests rejected by a gate, by gate name
    pub static ref GATE_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gate_rejections_total",
        "Requests rejected by the rate limit, auth, entitlement or quota gate",
        &["gate"]
    )
    .unwrap();

    // ========== Caches ==========

    /// Cache hits by cache type
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_hits_total",
        "Total cache hits",
        &["cache"]
    )
    .unwrap();

    /// Cache misses by cache type
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_misses_total",
        "Total cache misses",
        &["cache"]
    )
    .unwrap();

    // ========== Import jobs ==========

    /// Finished imports by outcome
    pub static ref IMPORTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "imports_total",
        "Finished playlist imports by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Import jobs currently in flight
    pub static ref ACTIVE_IMPORTS: IntGauge = register_int_gauge!(
        "active_imports",
        "Number of import jobs currently running"
    )
    .unwrap();
}

/// Record a completed HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn record_gate_rejection(gate: &str) {
    GATE_REJECTIONS_TOTAL.with_label_values(&[gate]).inc();
}

pub fn record_cache_hit(cache: &str) {
    CACHE_HITS_TOTAL.with_label_values(&[cache]).inc();
}

pub fn record_cache_miss(cache: &str) {
    CACHE_MISSES_TOTAL.with_label_values(&[cache]).inc();
}

pub fn record_import_outcome(outcome: &str) {
    IMPORTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Render all metrics in the Prometheus text exposition format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_in_text_format() {
        record_http_request("GET", "/health", 200, 0.001);
        record_gate_rejection("rate_limit");
        record_cache_hit("session");
        record_cache_miss("entitlement");
        record_import_outcome("completed");
        ACTIVE_IMPORTS.set(1);

        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("gate_rejections_total"));
        assert!(rendered.contains("imports_total"));
    }
}
