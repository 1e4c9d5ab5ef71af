//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Record a new WebSocket connection.
pub fn record_ws_connect() {
    metrics::counter!("ws_connections_total").increment(1);
}

/// Record a WebSocket disconnection.
pub fn record_ws_disconnect() {
    metrics::counter!("ws_disconnections_total").increment(1);
}

/// Current size of the hub's live set.
pub fn set_live_sessions(count: usize) {
    metrics::gauge!("hub_live_sessions").set(count as f64);
}

pub fn record_toggle() {
    metrics::counter!("grid_toggles_total").increment(1);
}

/// A session was dropped because its outbound queue was full or closed.
pub fn record_eviction() {
    metrics::counter!("hub_evictions_total").increment(1);
}

pub fn record_throttled() {
    metrics::counter!("commands_throttled_total").increment(1);
}

pub fn record_kick() {
    metrics::counter!("sessions_kicked_total").increment(1);
}

/// A connection from a banned origin was refused.
pub fn record_rejected() {
    metrics::counter!("sessions_rejected_total").increment(1);
}
