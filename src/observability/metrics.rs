//! Metrics collection and exposition.
//!
//! # Metrics
//! - `certificate_issuance_total` (counter): issuance attempts by outcome
//! - `certificate_denied_total` (counter): handshakes refused by host policy
//! - `maintenance_runs_total` (counter): daily maintenance runs by outcome
//! - `access_log_write_failures_total` (counter): dropped access log records
//!
//! Recording is a no-op until a recorder is installed, so the helpers are safe
//! to call from tests and from binaries that keep the exporter disabled.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_issuance(outcome: &'static str) {
    metrics::counter!("certificate_issuance_total", "outcome" => outcome).increment(1);
}

pub fn record_denied() {
    metrics::counter!("certificate_denied_total").increment(1);
}

pub fn record_maintenance(outcome: &'static str) {
    metrics::counter!("maintenance_runs_total", "outcome" => outcome).increment(1);
}

pub fn record_access_log_failure() {
    metrics::counter!("access_log_write_failures_total").increment(1);
}
