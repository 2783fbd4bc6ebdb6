//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_requests_total` (counter): requests by method, status, origin
//! - `edge_request_duration_seconds` (histogram): latency distribution
//! - `edge_routing_errors_total` (counter): routing failures rewritten to /500
//! - `edge_cache_outcomes_total` (counter): interceptor results (HIT, STALE, MISS, ...)
//! - `edge_revalidations_total` (counter): queue outcomes by kind
//! - `edge_purge_calls_total` (counter): purge API calls by result
//! - `edge_image_requests_total` (counter): image proxy results
//! - `edge_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `edge_background_tasks` (gauge): in-flight detached work
//!
//! # Design Decisions
//! - Callers record through small functions, never through raw macros
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, origin: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("origin", origin.to_string()),
    ];
    ::metrics::counter!("edge_requests_total", &labels).increment(1);
    ::metrics::histogram!("edge_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

/// One attempt against a render origin, retries included.
pub fn record_origin_attempt(backend: &str, status: u16, start: Instant) {
    let labels = [
        ("backend", backend.to_string()),
        ("status", status.to_string()),
    ];
    ::metrics::histogram!("edge_origin_latency_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_routing_error() {
    ::metrics::counter!("edge_routing_errors_total").increment(1);
}

pub fn record_cache_outcome(outcome: &'static str) {
    ::metrics::counter!("edge_cache_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_revalidation(outcome: &'static str) {
    ::metrics::counter!("edge_revalidations_total", "outcome" => outcome).increment(1);
}

pub fn record_purge_call(result: &'static str, tags: usize) {
    ::metrics::counter!("edge_purge_calls_total", "result" => result).increment(1);
    ::metrics::counter!("edge_purged_tags_total").increment(tags as u64);
}

pub fn record_image_request(result: &'static str) {
    ::metrics::counter!("edge_image_requests_total", "result" => result).increment(1);
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    ::metrics::gauge!("edge_backend_health", "backend" => backend.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_background_tasks(count: u64) {
    ::metrics::gauge!("edge_background_tasks").set(count as f64);
}
