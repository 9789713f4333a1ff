//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): outbound calls by provider, operation, outcome
//! - `gateway_request_duration_seconds` (histogram): outbound latency
//! - `gateway_retries_total` (counter): retry attempts by provider, operation
//! - `gateway_circuit_transitions_total` (counter): breaker state changes
//! - `gateway_rate_limit_waits_total` (counter): acquisitions that had to queue
//! - `gateway_cache_lookups_total` (counter): cache hits and misses
//! - `gateway_token_refreshes_total` (counter): token endpoint calls by outcome
//!
//! Without an installed recorder every call here is a no-op.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(provider: &str, operation: &str, outcome: &str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "provider" => provider.to_string(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "provider" => provider.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(provider: &str, operation: &str) {
    counter!(
        "gateway_retries_total",
        "provider" => provider.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_circuit_transition(key: &str, state: &str) {
    counter!(
        "gateway_circuit_transitions_total",
        "circuit" => key.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_rate_limit_wait(provider: &str) {
    counter!("gateway_rate_limit_waits_total", "provider" => provider.to_string()).increment(1);
}

pub fn record_cache_lookup(provider: &str, hit: bool) {
    counter!(
        "gateway_cache_lookups_total",
        "provider" => provider.to_string(),
        "result" => if hit { "hit" } else { "miss" }
    )
    .increment(1);
}

pub fn record_cache_size(provider: &str, size: usize) {
    gauge!("gateway_cache_entries", "provider" => provider.to_string()).set(size as f64);
}

pub fn record_token_refresh(provider: &str, success: bool) {
    counter!(
        "gateway_token_refreshes_total",
        "provider" => provider.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}
