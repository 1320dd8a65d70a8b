//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Describe the lifecycle metrics
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `zerodown_active_connections` (gauge): connections currently served
//! - `zerodown_signals_total` (counter): signals received, by signal
//! - `zerodown_respawns_total` (counter): replacement launches, by outcome
//! - `zerodown_drains_total` (counter): drains, by outcome
//! - `zerodown_drain_duration_seconds` (histogram): time spent draining
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade and are no-ops until a
//!   recorder is installed, so library users pay nothing by default
//! - The exporter is opt-in since the old and new process overlap during a
//!   handoff and only one can own the scrape port

use std::net::SocketAddr;
use std::time::Instant;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const ACTIVE_CONNECTIONS: &str = "zerodown_active_connections";
const SIGNALS_TOTAL: &str = "zerodown_signals_total";
const RESPAWNS_TOTAL: &str = "zerodown_respawns_total";
const DRAINS_TOTAL: &str = "zerodown_drains_total";
const DRAIN_DURATION: &str = "zerodown_drain_duration_seconds";

/// Drain duration buckets: 10ms to ~82s.
const DRAIN_BUCKETS: [f64; 14] = [
    0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
];

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DRAIN_DURATION.to_string()), &DRAIN_BUCKETS)?
        .with_http_listener(addr)
        .install()?;

    describe();
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

fn describe() {
    describe_gauge!(ACTIVE_CONNECTIONS, "Number of connections currently served");
    describe_counter!(SIGNALS_TOTAL, "Process signals received");
    describe_counter!(RESPAWNS_TOTAL, "Replacement process launches");
    describe_counter!(DRAINS_TOTAL, "Server drains by outcome");
    describe_histogram!(DRAIN_DURATION, "Time spent draining the server");
}

pub fn set_active_connections(count: u64) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

pub fn record_signal(signal: &'static str) {
    counter!(SIGNALS_TOTAL, "signal" => signal).increment(1);
}

pub fn record_respawn(outcome: &'static str) {
    counter!(RESPAWNS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_drain(outcome: &'static str, started: Instant) {
    counter!(DRAINS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(DRAIN_DURATION).record(started.elapsed().as_secs_f64());
}
