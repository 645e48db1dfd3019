//! Prometheus metrics for gate decisions.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters are registered once in the global default registry and updated
//! from the engine as decisions are committed.

use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

use crate::models::audit::AuditKind;

struct GateMetrics {
    scans_total: IntCounterVec,
    entries_total: IntCounterVec,
    audit_total: IntCounterVec,
    sensor_events_total: IntCounterVec,
}

static METRICS: Lazy<GateMetrics> = Lazy::new(|| GateMetrics {
    scans_total: register_int_counter_vec!(
        opts!("gate_scans_total", "Gate scans by result"),
        &["result"]
    )
    .expect("failed to register gate_scans_total"),
    entries_total: register_int_counter_vec!(
        opts!("gate_entries_total", "Entry requests by slot outcome"),
        &["outcome"]
    )
    .expect("failed to register gate_entries_total"),
    audit_total: register_int_counter_vec!(
        opts!("gate_audit_events_total", "Overrides and anomalies by kind"),
        &["kind"]
    )
    .expect("failed to register gate_audit_events_total"),
    sensor_events_total: register_int_counter_vec!(
        opts!("gate_sensor_events_total", "Sensor observations by outcome"),
        &["outcome"]
    )
    .expect("failed to register gate_sensor_events_total"),
});

/// `result` is VALID / INVALID / EXPIRED.
pub fn record_scan(result: &str) {
    METRICS.scans_total.with_label_values(&[result]).inc();
}

/// `outcome` is "assigned" or "waiting".
pub fn record_entry(outcome: &str) {
    METRICS.entries_total.with_label_values(&[outcome]).inc();
}

pub fn record_audit(kind: AuditKind) {
    METRICS.audit_total.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_sensor(outcome: &str) {
    METRICS.sensor_events_total.with_label_values(&[outcome]).inc();
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────
