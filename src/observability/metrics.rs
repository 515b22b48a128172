//! Metrics collection and exposition.
//!
//! # Metrics
//! - `health_probes_total` (counter): probe answers by `result`
//! - `shutdown_hooks_fired_total` (counter): hook triggers by `hook`
//! - `shutdown_hooks_completed_total` (counter): hook callbacks that returned
//! - `connections_drained_total` (counter): connections terminated on close
//! - `active_connections` (gauge): live connections on the listener
//!
//! Recording is a no-op until a recorder is installed.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_probe(healthy: bool) {
    let result = if healthy { "healthy" } else { "not_healthy" };
    counter!("health_probes_total", "result" => result).increment(1);
}

pub fn record_hook_fired(hook: &str) {
    counter!("shutdown_hooks_fired_total", "hook" => hook.to_string()).increment(1);
}

pub fn record_hook_completed(hook: &str) {
    counter!("shutdown_hooks_completed_total", "hook" => hook.to_string()).increment(1);
}

pub fn record_connections_drained(count: usize) {
    counter!("connections_drained_total").increment(count as u64);
}

pub fn set_active_connections(count: u64) {
    gauge!("active_connections").set(count as f64);
}
