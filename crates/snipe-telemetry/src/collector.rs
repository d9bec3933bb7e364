//! Rolling trade metrics.
//!
//! Keeps raw per-attempt samples for the retention window and computes
//! p50/p95/p99 by linear interpolation on demand. All reads come from
//! one consistent snapshot taken under the lock; percentile fields can
//! never tear against counts.
//!
//! Win rate and execution (fill) rate are distinct metrics: fill rate is
//! filled/attempted, win rate is profitable/filled.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use snipe_core::TokenId;

/// Retention configuration.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct MetricsConfig {
    /// Detailed samples older than this are pruned.
    #[serde(default = "default_history_hours")]
    pub history_hours: i64,
}

fn default_history_hours() -> i64 {
    24
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_hours: default_history_hours(),
        }
    }
}

/// One execution attempt's measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSample {
    pub at: DateTime<Utc>,
    pub token_id: TokenId,
    pub filled: bool,
    /// Price update to execution decision.
    pub tick_to_decision_ms: f64,
    /// Decision to venue acknowledgement.
    pub decision_to_ack_ms: f64,
    /// Expected edge in cents at decision time.
    pub edge_cents: f64,
    /// Realized P&L in dollars; zero until settlement.
    pub pnl: f64,
}

/// Latency percentile triplet over the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub samples: usize,
}

/// Consistent snapshot of the rolling window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub attempted: usize,
    pub filled: usize,
    /// filled / attempted.
    pub fill_rate: f64,
    /// profitable fills / fills. Distinct from fill_rate.
    pub win_rate: f64,
    pub missed: u64,
    pub total_pnl: f64,
    pub avg_edge_per_fill_cents: f64,
    pub decision_latency: LatencyStats,
    pub ack_latency: LatencyStats,
}

/// Alert thresholds evaluated against a snapshot.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_min_fill_rate")]
    pub min_fill_rate: f64,
    #[serde(default = "default_max_p95_decision_ms")]
    pub max_p95_decision_ms: f64,
    #[serde(default = "default_max_p95_ack_ms")]
    pub max_p95_ack_ms: f64,
}

fn default_min_fill_rate() -> f64 {
    0.5
}

fn default_max_p95_decision_ms() -> f64 {
    30.0
}

fn default_max_p95_ack_ms() -> f64 {
    150.0
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_fill_rate: default_min_fill_rate(),
            max_p95_decision_ms: default_max_p95_decision_ms(),
            max_p95_ack_ms: default_max_p95_ack_ms(),
        }
    }
}

/// A threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum Alert {
    FillRateBelow { rate: f64, threshold: f64 },
    DecisionLatencyAbove { p95_ms: f64, threshold_ms: f64 },
    AckLatencyAbove { p95_ms: f64, threshold_ms: f64 },
}

struct Inner {
    samples: Vec<TradeSample>,
    missed: u64,
}

/// Rolling metrics collector.
pub struct MetricsCollector {
    config: MetricsConfig,
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                samples: Vec::new(),
                missed: 0,
            }),
        }
    }

    /// Record one attempt, filled or not.
    pub fn record(&self, sample: TradeSample) {
        debug!(
            token_id = %sample.token_id,
            filled = sample.filled,
            tick_to_decision_ms = sample.tick_to_decision_ms,
            decision_to_ack_ms = sample.decision_to_ack_ms,
            "trade sample recorded"
        );
        self.inner.lock().samples.push(sample);
    }

    /// Record an opportunity that never reached dispatch.
    pub fn record_missed(&self, token_id: &TokenId, reason: &str) {
        warn!(token_id = %token_id, reason, "missed trade");
        self.inner.lock().missed += 1;
    }

    /// Book settlement P&L onto the most recent filled sample for the
    /// token.
    pub fn record_settlement(&self, token_id: &TokenId, pnl: f64) {
        let mut inner = self.inner.lock();
        if let Some(sample) = inner
            .samples
            .iter_mut()
            .rev()
            .find(|s| s.filled && &s.token_id == token_id)
        {
            sample.pnl = pnl;
        }
    }

    /// One consistent view of the whole window.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let attempted = inner.samples.len();
        let fills: Vec<&TradeSample> = inner.samples.iter().filter(|s| s.filled).collect();
        let filled = fills.len();
        let wins = fills.iter().filter(|s| s.pnl > 0.0).count();

        let decision: Vec<f64> = inner.samples.iter().map(|s| s.tick_to_decision_ms).collect();
        let ack: Vec<f64> = inner
            .samples
            .iter()
            .filter(|s| s.decision_to_ack_ms > 0.0)
            .map(|s| s.decision_to_ack_ms)
            .collect();

        MetricsSnapshot {
            attempted,
            filled,
            fill_rate: ratio(filled, attempted),
            win_rate: ratio(wins, filled),
            missed: inner.missed,
            total_pnl: fills.iter().map(|s| s.pnl).sum(),
            avg_edge_per_fill_cents: if filled > 0 {
                fills.iter().map(|s| s.edge_cents).sum::<f64>() / filled as f64
            } else {
                0.0
            },
            decision_latency: latency_stats(&decision),
            ack_latency: latency_stats(&ack),
        }
    }

    /// p95 decision-to-ack latency, for the RpcLag kill switch.
    #[must_use]
    pub fn p95_ack_ms(&self) -> f64 {
        self.snapshot().ack_latency.p95
    }

    /// Threshold breaches over the current window.
    #[must_use]
    pub fn alerts(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let snap = self.snapshot();
        let mut alerts = Vec::new();
        if snap.attempted > 0 && snap.fill_rate < thresholds.min_fill_rate {
            alerts.push(Alert::FillRateBelow {
                rate: snap.fill_rate,
                threshold: thresholds.min_fill_rate,
            });
        }
        if snap.decision_latency.samples > 0
            && snap.decision_latency.p95 > thresholds.max_p95_decision_ms
        {
            alerts.push(Alert::DecisionLatencyAbove {
                p95_ms: snap.decision_latency.p95,
                threshold_ms: thresholds.max_p95_decision_ms,
            });
        }
        if snap.ack_latency.samples > 0 && snap.ack_latency.p95 > thresholds.max_p95_ack_ms {
            alerts.push(Alert::AckLatencyAbove {
                p95_ms: snap.ack_latency.p95,
                threshold_ms: thresholds.max_p95_ack_ms,
            });
        }
        alerts
    }

    /// Drop samples older than the retention window. Returns the number
    /// pruned.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(self.config.history_hours);
        let mut inner = self.inner.lock();
        let before = inner.samples.len();
        inner.samples.retain(|s| s.at >= cutoff);
        before - inner.samples.len()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn latency_stats(samples: &[f64]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    LatencyStats {
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        max: *sorted.last().expect("non-empty"),
        samples: sorted.len(),
    }
}

/// Linear interpolation between closest ranks; `sorted` must be sorted.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample(at: DateTime<Utc>, filled: bool, decision: f64, ack: f64, pnl: f64) -> TradeSample {
        TradeSample {
            at,
            token_id: TokenId::from("tok"),
            filled,
            tick_to_decision_ms: decision,
            decision_to_ack_ms: ack,
            edge_cents: 3.0,
            pnl,
        }
    }

    #[test]
    fn percentile_linear_interpolation() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 50.0), 25.0);
        assert!((percentile(&sorted, 95.0) - 38.5).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 100.0), 40.0);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn fill_rate_and_win_rate_are_distinct() {
        let c = MetricsCollector::new(MetricsConfig::default());
        // 4 attempts, 2 fills, 1 winner.
        c.record(sample(t0(), true, 5.0, 80.0, 0.30));
        c.record(sample(t0(), true, 5.0, 90.0, -10.0));
        c.record(sample(t0(), false, 5.0, 0.0, 0.0));
        c.record(sample(t0(), false, 5.0, 0.0, 0.0));

        let snap = c.snapshot();
        assert_eq!(snap.attempted, 4);
        assert_eq!(snap.filled, 2);
        assert!((snap.fill_rate - 0.5).abs() < 1e-9);
        assert!((snap.win_rate - 0.5).abs() < 1e-9);
        assert!((snap.total_pnl - (-9.70)).abs() < 1e-9);
    }

    #[test]
    fn settlement_updates_latest_fill() {
        let c = MetricsCollector::new(MetricsConfig::default());
        c.record(sample(t0(), true, 5.0, 80.0, 0.0));
        c.record_settlement(&TokenId::from("tok"), 0.30);
        let snap = c.snapshot();
        assert!((snap.total_pnl - 0.30).abs() < 1e-9);
        assert!((snap.win_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ack_latency_excludes_undispatched_attempts() {
        let c = MetricsCollector::new(MetricsConfig::default());
        c.record(sample(t0(), true, 5.0, 100.0, 0.0));
        c.record(sample(t0(), false, 5.0, 0.0, 0.0));
        let snap = c.snapshot();
        assert_eq!(snap.ack_latency.samples, 1);
        assert_eq!(snap.decision_latency.samples, 2);
    }

    #[test]
    fn alerts_fire_on_breach() {
        let c = MetricsCollector::new(MetricsConfig::default());
        for _ in 0..9 {
            c.record(sample(t0(), false, 50.0, 0.0, 0.0));
        }
        c.record(sample(t0(), true, 50.0, 500.0, 0.0));

        let alerts = c.alerts(&AlertThresholds::default());
        assert!(alerts
            .iter()
            .any(|a| matches!(a, Alert::FillRateBelow { .. })));
        assert!(alerts
            .iter()
            .any(|a| matches!(a, Alert::DecisionLatencyAbove { .. })));
        assert!(alerts
            .iter()
            .any(|a| matches!(a, Alert::AckLatencyAbove { .. })));
    }

    #[test]
    fn no_alerts_on_empty_window() {
        let c = MetricsCollector::new(MetricsConfig::default());
        assert!(c.alerts(&AlertThresholds::default()).is_empty());
    }

    #[test]
    fn prune_respects_retention() {
        let c = MetricsCollector::new(MetricsConfig { history_hours: 24 });
        c.record(sample(t0(), true, 5.0, 80.0, 0.0));
        c.record(sample(t0() + Duration::hours(30), true, 5.0, 80.0, 0.0));

        let pruned = c.prune(t0() + Duration::hours(30));
        assert_eq!(pruned, 1);
        assert_eq!(c.snapshot().attempted, 1);
    }
}
