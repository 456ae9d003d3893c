//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cache_requests_total` (counter): cache reads by backend, op, outcome
//! - `cache_degraded_total` (counter): degraded defaults served while the circuit is open
//! - `circuit_transitions_total` (counter): state changes by circuit and target state
//! - `circuit_rejections_total` (counter): calls refused by an open circuit
//! - `circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `local_cache_entries` (gauge) / `local_cache_evictions_total` (counter)
//! - `rbac_invalidated_users_total` (counter): users cleared by invalidation kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is optional and bound at startup

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder with its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_read(backend: &'static str, op: &'static str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("cache_requests_total", "backend" => backend, "op" => op, "outcome" => outcome)
        .increment(1);
}

pub fn record_degraded(op: &'static str) {
    counter!("cache_degraded_total", "op" => op).increment(1);
}

pub fn record_circuit_transition(circuit: &str, to: CircuitState) {
    counter!(
        "circuit_transitions_total",
        "circuit" => circuit.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(circuit, to);
}

pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("circuit_state", "circuit" => circuit.to_string()).set(value);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!("circuit_rejections_total", "circuit" => circuit.to_string()).increment(1);
}

pub fn record_local_entries(count: usize) {
    gauge!("local_cache_entries").set(count as f64);
}

pub fn record_local_eviction() {
    counter!("local_cache_evictions_total").increment(1);
}

pub fn record_invalidated_users(kind: &'static str, count: usize) {
    counter!("rbac_invalidated_users_total", "kind" => kind).increment(count as u64);
}
