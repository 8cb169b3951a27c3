//! Metrics collection and export for Lobby.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_lobby_core::DispatchOutcome;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "lobby_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "lobby_connections_active";
    pub const MESSAGES_TOTAL: &str = "lobby_messages_total";
    pub const MESSAGES_BYTES: &str = "lobby_messages_bytes";
    pub const IDENTIFY_TOTAL: &str = "lobby_identify_total";
    pub const SESSIONS_ACTIVE: &str = "lobby_sessions_active";
    pub const EVICTIONS_TOTAL: &str = "lobby_duplicate_sessions_total";
    pub const SEND_FAILURES_TOTAL: &str = "lobby_send_failures_total";
    pub const ENCODE_FAILURES_TOTAL: &str = "lobby_encode_failures_total";
    pub const LATENCY_SECONDS: &str = "lobby_dispatch_latency_seconds";
    pub const ERRORS_TOTAL: &str = "lobby_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_counter!(names::IDENTIFY_TOTAL, "Identify messages by outcome");
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of user sessions");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Sessions evicted by a newer connection for the same user"
    );
    metrics::describe_counter!(
        names::SEND_FAILURES_TOTAL,
        "Broadcast sends that could not be queued"
    );
    metrics::describe_counter!(
        names::ENCODE_FAILURES_TOTAL,
        "Broadcast events dropped because they could not be encoded"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound message dispatch latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record the outcome of a dispatched message.
pub fn record_dispatch(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Ignored => {
            counter!(names::IDENTIFY_TOTAL, "outcome" => "ignored").increment(1);
        }
        DispatchOutcome::UnknownIdentity(_) => {
            counter!(names::IDENTIFY_TOTAL, "outcome" => "unknown").increment(1);
        }
        DispatchOutcome::Joined {
            evicted, report, ..
        } => {
            counter!(names::IDENTIFY_TOTAL, "outcome" => "joined").increment(1);
            if evicted.is_some() {
                counter!(names::EVICTIONS_TOTAL).increment(1);
            }
            if report.failed > 0 {
                counter!(names::SEND_FAILURES_TOTAL).increment(report.failed as u64);
            }
            if report.encode_failed > 0 {
                counter!(names::ENCODE_FAILURES_TOTAL).increment(report.encode_failed as u64);
            }
        }
    }
}

/// Update active session count.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
