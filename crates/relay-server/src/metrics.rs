//! Metrics collection and export for Payrelay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use payrelay_core::{HubHandle, RegistryStats};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "payrelay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "payrelay_connections_active";
    pub const MESSAGES_TOTAL: &str = "payrelay_messages_total";
    pub const MESSAGES_BYTES: &str = "payrelay_messages_bytes";
    pub const CHANNELS_ACTIVE: &str = "payrelay_channels_active";
    pub const SUBSCRIBERS_ACTIVE: &str = "payrelay_subscribers_active";
    pub const SUBMIT_SECONDS: &str = "payrelay_submit_seconds";
    pub const ERRORS_TOTAL: &str = "payrelay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
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
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of channels");
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of subscribers registered to at least one channel"
    );
    metrics::describe_histogram!(
        names::SUBMIT_SECONDS,
        "Time spent handing an inbound frame to the relay loop, in seconds"
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

/// Periodically sample hub statistics into gauges.
///
/// The task ends when the hub stops.
pub fn spawn_stats_reporter(hub: HubHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            match hub.stats().await {
                Ok(stats) => set_hub_stats(&stats),
                Err(e) => {
                    debug!(error = %e, "Stopping stats reporter");
                    break;
                }
            }
        }
    })
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
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record how long a submit to the relay loop took.
pub fn record_submit_latency(seconds: f64) {
    histogram!(names::SUBMIT_SECONDS).record(seconds);
}

/// Update channel and subscriber gauges.
pub fn set_hub_stats(stats: &RegistryStats) {
    gauge!(names::CHANNELS_ACTIVE).set(stats.channel_count as f64);
    gauge!(names::SUBSCRIBERS_ACTIVE).set(stats.subscriber_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
