//! Metrics collection and export for tether.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tether_core::Hub;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tether_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tether_connections_active";
    pub const USERS_ONLINE: &str = "tether_users_online";
    pub const MESSAGES_TOTAL: &str = "tether_messages_total";
    pub const MESSAGES_BYTES: &str = "tether_messages_bytes";
    pub const CHANNELS_ACTIVE: &str = "tether_channels_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "tether_subscriptions_total";
    pub const DROPPED_MESSAGES: &str = "tether_dropped_messages";
    pub const COMMAND_LATENCY_SECONDS: &str = "tether_command_latency_seconds";
    pub const ERRORS_TOTAL: &str = "tether_errors_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a live connection here");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Channels with at least one subscriber");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_gauge!(
        names::DROPPED_MESSAGES,
        "Messages dropped on full outbound queues since start"
    );
    metrics::describe_histogram!(
        names::COMMAND_LATENCY_SECONDS,
        "Client command handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

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

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record how long a command took to handle.
pub fn record_command_latency(command: &str, seconds: f64) {
    histogram!(names::COMMAND_LATENCY_SECONDS, "command" => command.to_string()).record(seconds);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Copy the registry's counters into gauges every `period` until cancelled.
pub async fn sample_hub(hub: Hub, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = hub.stats();
                gauge!(names::CHANNELS_ACTIVE).set(stats.channels as f64);
                gauge!(names::USERS_ONLINE).set(stats.users as f64);
                gauge!(names::DROPPED_MESSAGES).set(stats.dropped_messages as f64);
            }
        }
    }
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
