//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define engine metrics (captured exchanges, verdicts, served requests)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `replay_exchanges_captured_total` (counter): exchanges reassembled from packets
//! - `replay_streams_discarded_total` (counter): streams dropped, by reason
//! - `replay_verdicts_total` (counter): match verdicts, by outcome
//! - `replay_requests_total` (counter): requests served by the replay server, by status
//! - `replay_request_duration_seconds` (histogram): replay latency distribution
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording without an installed exporter is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "replay_exchanges_captured_total",
        "HTTP exchanges reassembled from captured packets"
    );
    describe_counter!("replay_streams_discarded_total", "TCP streams dropped without an exchange");
    describe_counter!("replay_verdicts_total", "Match verdicts by outcome");
    describe_counter!("replay_requests_total", "Requests answered by the replay server");
    describe_histogram!(
        "replay_request_duration_seconds",
        metrics::Unit::Seconds,
        "Replay server request latency"
    );
}

pub fn record_exchange_captured() {
    counter!("replay_exchanges_captured_total").increment(1);
}

pub fn record_stream_discarded(reason: &'static str) {
    counter!("replay_streams_discarded_total", "reason" => reason).increment(1);
}

pub fn record_verdict(outcome: &'static str) {
    counter!("replay_verdicts_total", "outcome" => outcome).increment(1);
}

pub fn record_request(status: u16, start: Instant) {
    counter!("replay_requests_total", "status" => status.to_string()).increment(1);
    histogram!("replay_request_duration_seconds").record(start.elapsed().as_secs_f64());
}
