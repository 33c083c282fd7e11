//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): relayed and locally answered requests by method, status
//! - `gateway_request_duration_seconds` (histogram): time to response head
//! - `gateway_upstream_errors_total` (counter): local failures by code
//! - `orchestrator_resources_settled_total` (counter): settled resources by outcome
//! - `orchestrator_stale_completions_total` (counter): results discarded after cancellation

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_gateway_error(code: &'static str) {
    counter!("gateway_upstream_errors_total", "kind" => code).increment(1);
}

pub fn record_resource_settled(outcome: &'static str) {
    counter!("orchestrator_resources_settled_total", "outcome" => outcome).increment(1);
}

pub fn record_stale_completion() {
    counter!("orchestrator_stale_completions_total").increment(1);
}
