//! Metrics collection and export for Chime.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "chime_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "chime_sessions_active";
    pub const MESSAGES_TOTAL: &str = "chime_messages_total";
    pub const BROADCASTS_TOTAL: &str = "chime_broadcasts_total";
    pub const NOTIFICATIONS_TOTAL: &str = "chime_notifications_total";
    pub const NOTIFICATION_RECIPIENTS_TOTAL: &str = "chime_notification_recipients_total";
    pub const DISPATCH_SECONDS: &str = "chime_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "chime_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of realtime sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of open sessions");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Chat messages dispatched, by kind");
    metrics::describe_counter!(
        names::BROADCASTS_TOTAL,
        "Realtime chat events delivered to recipients"
    );
    metrics::describe_counter!(names::NOTIFICATIONS_TOTAL, "Notifications created");
    metrics::describe_counter!(
        names::NOTIFICATION_RECIPIENTS_TOTAL,
        "Recipients notifications were pushed to"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Message dispatch latency in seconds"
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

fn record_session_opened() {
    counter!(names::SESSIONS_TOTAL).increment(1);
    gauge!(names::SESSIONS_ACTIVE).increment(1.0);
}

fn record_session_closed() {
    gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a dispatched message.
pub fn record_message(system: bool) {
    let kind = if system { "system" } else { "chat" };
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record a realtime event delivered to one recipient.
pub fn record_broadcast() {
    counter!(names::BROADCASTS_TOTAL).increment(1);
}

/// Record a notification pushed to `recipients` users.
pub fn record_notification(recipients: usize) {
    counter!(names::NOTIFICATIONS_TOTAL).increment(1);
    counter!(names::NOTIFICATION_RECIPIENTS_TOTAL).increment(recipients as u64);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records the session closing on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording an opened session.
    #[must_use]
    pub fn new() -> Self {
        record_session_opened();
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        record_session_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op
        let _guard = SessionMetricsGuard::new();
        record_message(false);
        record_message(true);
        record_notification(3);
        record_error("dispatch");
    }
}
