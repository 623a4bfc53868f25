//! Metrics collection and exposition.
//!
//! # Metrics
//! - `rpc_requests_total` (counter): inbound requests by protocol, status
//! - `rpc_request_duration_seconds` (histogram): inbound latency by protocol
//! - `rpc_outbound_attempts_total` (counter): outbound attempts by protocol, outcome
//! - `rpc_pool_connections` (gauge): registered pooled connections per target
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality (no paths)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::api::Protocol;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(protocol: Protocol, status: u16, started: Instant) {
    counter!(
        "rpc_requests_total",
        "protocol" => protocol.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("rpc_request_duration_seconds", "protocol" => protocol.as_str())
        .record(started.elapsed().as_secs_f64());
}

/// Outcome labels for outbound attempts.
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const RETRY: &str = "retry";
    pub const FAILURE: &str = "failure";
}

pub fn record_outbound_attempt(protocol: Protocol, outcome: &'static str) {
    counter!(
        "rpc_outbound_attempts_total",
        "protocol" => protocol.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_pool_size(target: &str, size: usize) {
    gauge!("rpc_pool_connections", "target" => target.to_string()).set(size as f64);
}
