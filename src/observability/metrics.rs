//! Metrics collection and exposition.
//!
//! # Metrics
//! - `connector_connections_accepted_total` (counter)
//! - `connector_connections_rejected_total` (counter, `reason` = total|per_host)
//! - `connector_accept_deferred_total` (counter): accept events skipped while overloaded
//! - `connector_accept_errors_total` (counter)
//! - `connector_connections_closed_total` (counter)
//! - `connector_active_connections` (gauge)
//!
//! Recording without an installed recorder is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted(active: usize) {
    counter!("connector_connections_accepted_total").increment(1);
    gauge!("connector_active_connections").set(active as f64);
}

pub fn record_rejected(reason: &'static str) {
    counter!("connector_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn record_deferred() {
    counter!("connector_accept_deferred_total").increment(1);
}

pub fn record_accept_error() {
    counter!("connector_accept_errors_total").increment(1);
}

pub fn record_closed(active: usize) {
    counter!("connector_connections_closed_total").increment(1);
    gauge!("connector_active_connections").set(active as f64);
}
