//! Prometheus metrics for the sniper engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration
//! fails, it indicates a fatal configuration error (e.g., duplicate
//! metric names) that should crash at startup rather than fail silently.
//! These panics only occur during static initialization, never at
//! runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, register_int_gauge_vec,
    CounterVec, HistogramVec, IntGauge, IntGaugeVec,
};

/// Total execution attempts by terminal outcome.
pub static ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_attempts_total",
        "Total execution attempts by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Total gate denials by reason.
pub static GATE_DENIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_gate_denied_total",
        "Total risk gate denials by reason",
        &["reason"]
    )
    .unwrap()
});

/// Kill switch state (1 = active) by kind.
pub static KILL_SWITCH_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "snipe_kill_switch_active",
        "Kill switch state (1=active)",
        &["kind"]
    )
    .unwrap()
});

/// Total circuit breaker trips.
pub static BREAKER_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "snipe_breaker_trips_total",
        "Total circuit breaker trips",
        &["token_id"]
    )
    .unwrap()
});

/// Tick-to-decision latency distribution.
pub static DECISION_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "snipe_decision_latency_ms",
        "Tick-to-decision latency in milliseconds",
        &["token_id"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0]
    )
    .unwrap()
});

/// Decision-to-ack latency distribution.
pub static ACK_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "snipe_ack_latency_ms",
        "Decision-to-ack latency in milliseconds",
        &["token_id"],
        vec![10.0, 25.0, 50.0, 100.0, 150.0, 250.0, 500.0, 1000.0, 2000.0]
    )
    .unwrap()
});

/// Expected edge at fill, in cents.
pub static FILL_EDGE_CENTS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "snipe_fill_edge_cents",
        "Expected edge per fill in cents",
        &["token_id"],
        vec![0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 20.0]
    )
    .unwrap()
});

/// Markets currently queued for execution.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("snipe_queue_depth", "Markets queued for execution").unwrap()
});

/// Capital currently reserved, in cents (gauge precision is fine here).
pub static RESERVED_CAPITAL_CENTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "snipe_reserved_capital_cents",
        "Capital currently reserved, in cents"
    )
    .unwrap()
});

/// Convenience facade mirroring the call sites.
pub struct Metrics;

impl Metrics {
    pub fn attempt(outcome: &str) {
        ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn gate_denied(reason: &str) {
        GATE_DENIED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn kill_switch(kind: &str, active: bool) {
        KILL_SWITCH_ACTIVE
            .with_label_values(&[kind])
            .set(i64::from(active));
    }

    pub fn breaker_trip(token_id: &str) {
        BREAKER_TRIPS_TOTAL.with_label_values(&[token_id]).inc();
    }

    pub fn latencies(token_id: &str, decision_ms: f64, ack_ms: Option<f64>) {
        DECISION_LATENCY_MS
            .with_label_values(&[token_id])
            .observe(decision_ms);
        if let Some(ack) = ack_ms {
            ACK_LATENCY_MS.with_label_values(&[token_id]).observe(ack);
        }
    }

    pub fn fill(token_id: &str, edge_cents: f64) {
        FILL_EDGE_CENTS
            .with_label_values(&[token_id])
            .observe(edge_cents);
    }

    pub fn queue_depth(depth: usize) {
        QUEUE_DEPTH.set(depth as i64);
    }

    pub fn reserved_capital_cents(cents: i64) {
        RESERVED_CAPITAL_CENTS.set(cents);
    }
}
