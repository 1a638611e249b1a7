//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define broker metrics (connections, subscriptions, messages)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `broker_connections_total` (counter): accepted connections by listener
//! - `broker_disconnects_total` (counter): ended connections by listener, graceful
//! - `broker_active_clients` (gauge): current connected clients
//! - `broker_subscriptions` (gauge): live subscriptions
//! - `broker_messages_published_total` (counter): routed messages
//! - `broker_bytes_published_total` (counter): routed payload bytes
//!
//! # Design Decisions
//! - Updates go through the `metrics` facade; without an installed recorder
//!   they are no-ops
//! - Exporter install failure is logged, never fatal
//! - Counters end in `_total`, gauges do not

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub const CONNECTIONS_TOTAL: &str = "broker_connections_total";
pub const DISCONNECTS_TOTAL: &str = "broker_disconnects_total";
pub const MESSAGES_PUBLISHED_TOTAL: &str = "broker_messages_published_total";
pub const BYTES_PUBLISHED_TOTAL: &str = "broker_bytes_published_total";
pub const ACTIVE_CLIENTS: &str = "broker_active_clients";
pub const SUBSCRIPTIONS: &str = "broker_subscriptions";

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connect(listener: &str) {
    metrics::counter!(CONNECTIONS_TOTAL, "listener" => listener.to_string()).increment(1);
    metrics::gauge!(ACTIVE_CLIENTS).increment(1.0);
}

pub fn record_disconnect(listener: &str, graceful: bool) {
    metrics::counter!(
        DISCONNECTS_TOTAL,
        "listener" => listener.to_string(),
        "graceful" => graceful.to_string()
    )
    .increment(1);
    metrics::gauge!(ACTIVE_CLIENTS).decrement(1.0);
}

pub fn record_subscriptions(delta: i64) {
    metrics::gauge!(SUBSCRIPTIONS).increment(delta as f64);
}

pub fn record_published(bytes: usize) {
    metrics::counter!(MESSAGES_PUBLISHED_TOTAL).increment(1);
    metrics::counter!(BYTES_PUBLISHED_TOTAL).increment(bytes as u64);
}
