//! The execution pipeline.
//!
//! `execute` runs dedupe, the rate-limit budget (with capped
//! exponential backoff), then dispatches the signed order on the
//! blocking worker pool under a timeout. Every terminal outcome except
//! `Duplicate` is journaled durably and recorded in the metrics
//! collector before control returns to the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use snipe_core::{Clock, OrderRequest, TradeOutcome, VenueError};
use snipe_journal::{JournalEntry, TradeJournal, TradeRecord};
use snipe_telemetry::{Metrics, MetricsCollector, TradeSample};

use crate::error::{ExecutorError, ExecutorResult};
use crate::throttle::{Throttle, ThrottleConfig};
use crate::venue::{OrderArgs, VenueClient};

/// Dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-dispatch timeout for the blocking venue call.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    /// Rate-limit retries before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Backoff ceiling (5 minutes).
    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
    /// Skip `post_order` and record a synthetic fill; everything else
    /// behaves identically.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

fn default_order_timeout_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_cap_ms() -> u64 {
    300_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: default_order_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
            dry_run: false,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Session-level execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub attempted: u64,
    pub filled: u64,
    pub failed: u64,
}

/// Fill-or-kill order executor.
pub struct Executor {
    venue: Arc<dyn VenueClient>,
    throttle: Throttle,
    journal: Arc<TradeJournal>,
    metrics: Arc<MetricsCollector>,
    clock: Clock,
    config: ExecutorConfig,
    attempted: AtomicU64,
    filled: AtomicU64,
    failed: AtomicU64,
}

impl Executor {
    #[must_use]
    pub fn new(
        venue: Arc<dyn VenueClient>,
        journal: Arc<TradeJournal>,
        metrics: Arc<MetricsCollector>,
        clock: Clock,
        config: ExecutorConfig,
    ) -> Self {
        let throttle = Throttle::new(config.throttle.clone());
        Self {
            venue,
            throttle,
            journal,
            metrics,
            clock,
            config,
            attempted: AtomicU64::new(0),
            filled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Execute one fill-or-kill attempt.
    ///
    /// `tick_mono_ms` is the monotonic stamp of the tick that triggered
    /// the decision, for tick-to-decision latency. `requested_size` is
    /// set by the caller only when the allocator clamped the grant
    /// below the original request; it is journaled as passed.
    pub async fn execute(
        &self,
        request: OrderRequest,
        expected_edge_cents: Decimal,
        negative_risk: bool,
        tick_mono_ms: Option<u64>,
        requested_size: Option<snipe_core::Usd>,
    ) -> ExecutorResult<TradeOutcome> {
        let decision_mono = self.clock.monotonic_ms();
        let tick_to_decision_ms = tick_mono_ms
            .map(|t| decision_mono.saturating_sub(t) as f64)
            .unwrap_or(0.0);

        // Dedupe: the second identical request has no side effects.
        // Children of one split grant share a correlation id and pass.
        let key = self.throttle.key_for(&request);
        if !self
            .throttle
            .try_begin(&key, request.correlation_id.as_str(), self.clock.now_utc())
        {
            return Ok(TradeOutcome::Duplicate);
        }

        // Rate limit with capped exponential backoff.
        let mut admitted = false;
        for attempt in 0..=self.config.max_retries {
            if self.throttle.try_consume_slot(self.clock.now_utc()) {
                admitted = true;
                break;
            }
            if attempt == self.config.max_retries {
                break;
            }
            let backoff_ms = self
                .config
                .retry_base_ms
                .saturating_mul(1u64 << attempt.min(16))
                .min(self.config.retry_cap_ms);
            debug!(
                correlation_id = %request.correlation_id,
                attempt,
                backoff_ms,
                "rate limited, backing off"
            );
            tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
        }

        let outcome = if admitted {
            self.dispatch(&request, negative_risk).await?
        } else {
            warn!(correlation_id = %request.correlation_id, "rate limit retries exhausted");
            TradeOutcome::RateLimited
        };

        let ack_mono = self.clock.monotonic_ms();
        let decision_to_ack_ms = if admitted {
            (ack_mono - decision_mono) as f64
        } else {
            0.0
        };

        self.throttle.finish(
            &key,
            request.correlation_id.as_str(),
            outcome.is_filled(),
            self.clock.now_utc(),
        );
        self.record(
            &request,
            &outcome,
            expected_edge_cents,
            tick_to_decision_ms,
            decision_to_ack_ms,
            requested_size,
        )?;
        Ok(outcome)
    }

    /// Counters since process start.
    #[must_use]
    pub fn session_counters(&self) -> SessionCounters {
        SessionCounters {
            attempted: self.attempted.load(Ordering::Relaxed),
            filled: self.filled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Dispatches inside the current rate window.
    #[must_use]
    pub fn rate_window_len(&self) -> usize {
        self.throttle.in_window(self.clock.now_utc())
    }

    /// Sign and post on the blocking pool, under the order timeout.
    async fn dispatch(
        &self,
        request: &OrderRequest,
        negative_risk: bool,
    ) -> ExecutorResult<TradeOutcome> {
        if self.config.dry_run {
            info!(
                correlation_id = %request.correlation_id,
                token_id = %request.token_id,
                size = %request.size,
                price = %request.price,
                "dry run: synthetic fill"
            );
            return Ok(TradeOutcome::Filled {
                price: request.price,
                size: request.size,
            });
        }

        let args = OrderArgs {
            token_id: request.token_id.clone(),
            amount_usd: request.size,
            side: request.side,
            action: request.action,
            price: request.price,
            negative_risk,
        };
        let venue = self.venue.clone();
        let call = tokio::task::spawn_blocking(move || {
            let signed = venue.create_market_order(&args)?;
            venue.post_order_fok(signed)
        });

        let timeout = StdDuration::from_millis(self.config.order_timeout_ms);
        let result = match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                warn!(
                    correlation_id = %request.correlation_id,
                    timeout_ms = self.config.order_timeout_ms,
                    "venue dispatch timed out"
                );
                return Ok(TradeOutcome::Timeout);
            }
            Ok(Err(join_err)) => {
                return Err(ExecutorError::WorkerPool(join_err.to_string()));
            }
            Ok(Ok(result)) => result,
        };

        let outcome = match result {
            Ok(ack) if ack.accepted => TradeOutcome::Filled {
                price: ack.fill_price.unwrap_or(request.price),
                size: request.size,
            },
            Ok(ack) => TradeOutcome::RejectedByVenue {
                reason: ack.reject_reason.unwrap_or_else(|| {
                    VenueError::Unknown("rejected without reason".to_string())
                }),
            },
            Err(VenueError::Timeout) => TradeOutcome::Timeout,
            Err(reason) => TradeOutcome::RejectedByVenue { reason },
        };
        Ok(outcome)
    }

    /// Durable journal append and metrics, for every terminal outcome.
    fn record(
        &self,
        request: &OrderRequest,
        outcome: &TradeOutcome,
        expected_edge_cents: Decimal,
        tick_to_decision_ms: f64,
        decision_to_ack_ms: f64,
        requested_size: Option<snipe_core::Usd>,
    ) -> ExecutorResult<()> {
        let now = self.clock.now_utc();

        self.attempted.fetch_add(1, Ordering::Relaxed);
        if outcome.is_filled() {
            self.filled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        self.journal.append(JournalEntry::Trade(TradeRecord {
            id: 0,
            wall_time: now,
            correlation_id: request.correlation_id.to_string(),
            token_id: request.token_id.clone(),
            side: request.side,
            action: request.action,
            size: request.size,
            price: request.price,
            outcome: outcome.clone(),
            tick_to_decision_ms,
            decision_to_ack_ms,
            expected_edge_cents,
            requested_size,
            realized_pnl: None,
        }))?;

        self.metrics.record(TradeSample {
            at: now,
            token_id: request.token_id.clone(),
            filled: outcome.is_filled(),
            tick_to_decision_ms,
            decision_to_ack_ms,
            edge_cents: expected_edge_cents.to_f64().unwrap_or(0.0),
            pnl: 0.0,
        });

        let label = outcome.label();
        Metrics::attempt(label);
        Metrics::latencies(
            request.token_id.as_str(),
            tick_to_decision_ms,
            (decision_to_ack_ms > 0.0).then_some(decision_to_ack_ms),
        );
        if outcome.is_filled() {
            Metrics::fill(
                request.token_id.as_str(),
                expected_edge_cents.to_f64().unwrap_or(0.0),
            );
        }

        info!(
            correlation_id = %request.correlation_id,
            token_id = %request.token_id,
            outcome = label,
            tick_to_decision_ms,
            decision_to_ack_ms,
            "execution attempt recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use snipe_core::{
        Action, CorrelationId, ManualClock, Price, Side, SystemClock, TokenId, Usd,
    };
    use snipe_journal::JournalConfig;
    use snipe_telemetry::MetricsConfig;
    use tempfile::TempDir;

    use crate::mock::MockVenue;

    fn request(token: &str, size: Decimal) -> OrderRequest {
        OrderRequest::new(
            TokenId::from(token),
            Side::Yes,
            Action::Buy,
            Usd::new(size),
            Price::new(dec!(0.97)),
            "expiry-snipe",
            Usd::new(dec!(100)),
            CorrelationId::new(0),
        )
        .unwrap()
    }

    struct Harness {
        _dir: TempDir,
        venue: Arc<MockVenue>,
        journal: Arc<TradeJournal>,
        executor: Executor,
    }

    fn harness(config: ExecutorConfig, clock: Clock) -> Harness {
        let dir = TempDir::new().unwrap();
        let venue = Arc::new(MockVenue::default());
        let journal = Arc::new(
            TradeJournal::open(JournalConfig {
                dir: dir.path().to_path_buf(),
                fsync: true,
            })
            .unwrap(),
        );
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
        let executor = Executor::new(
            venue.clone(),
            journal.clone(),
            metrics,
            clock,
            config,
        );
        Harness {
            _dir: dir,
            venue,
            journal,
            executor,
        }
    }

    fn epoch() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn fill_is_journaled_before_return() {
        let h = harness(ExecutorConfig::default(), Arc::new(SystemClock::new()));
        let outcome = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(outcome.is_filled());
        assert_eq!(h.venue.posted_count(), 1);

        let entries = h.journal.iter_since(epoch()).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            JournalEntry::Trade(r) => assert!(r.outcome.is_filled()),
            JournalEntry::Release(_) => panic!("expected trade entry"),
        }
        assert_eq!(h.executor.session_counters().filled, 1);
    }

    #[tokio::test]
    async fn dry_run_skips_venue_but_journals() {
        let h = harness(
            ExecutorConfig {
                dry_run: true,
                ..ExecutorConfig::default()
            },
            Arc::new(SystemClock::new()),
        );
        let outcome = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TradeOutcome::Filled {
                price: Price::new(dec!(0.97)),
                size: Usd::new(dec!(10)),
            }
        );
        assert_eq!(h.venue.posted_count(), 0);
        assert_eq!(h.journal.iter_since(epoch()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_has_no_side_effects() {
        let h = harness(ExecutorConfig::default(), Arc::new(SystemClock::new()));
        let first = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(first.is_filled());

        // Identical key within the dedupe window.
        let second = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(second, TradeOutcome::Duplicate);
        assert_eq!(h.venue.posted_count(), 1);
        assert_eq!(h.journal.iter_since(epoch()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_children_share_one_dedupe_claim() {
        let h = harness(ExecutorConfig::default(), Arc::new(SystemClock::new()));
        let batch = CorrelationId::new(0);
        let child = |corr: &CorrelationId| {
            OrderRequest::new(
                TokenId::from("tok"),
                Side::Yes,
                Action::Buy,
                Usd::new(dec!(10)),
                Price::new(dec!(0.97)),
                "expiry-snipe",
                Usd::new(dec!(100)),
                corr.clone(),
            )
            .unwrap()
        };

        // Two equal-sized children of one split grant both fill.
        let first = h
            .executor
            .execute(child(&batch), dec!(3.00), false, None, None)
            .await
            .unwrap();
        let second = h
            .executor
            .execute(child(&batch), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(first.is_filled());
        assert!(second.is_filled());

        // An independent attempt on the same key is still suppressed.
        let other = h
            .executor
            .execute(child(&CorrelationId::new(1)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(other, TradeOutcome::Duplicate);
        assert_eq!(h.venue.posted_count(), 2);
    }

    #[tokio::test]
    async fn venue_rejection_maps_to_outcome() {
        let h = harness(ExecutorConfig::default(), Arc::new(SystemClock::new()));
        h.venue
            .enqueue_rejections(VenueError::NoLiquidity, 1);
        let outcome = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TradeOutcome::RejectedByVenue {
                reason: VenueError::NoLiquidity
            }
        );
        assert_eq!(h.executor.session_counters().failed, 1);
    }

    #[tokio::test]
    async fn venue_timeout_maps_to_timeout_outcome() {
        let h = harness(ExecutorConfig::default(), Arc::new(SystemClock::new()));
        h.venue.enqueue_response(Err(VenueError::Timeout));
        let outcome = h
            .executor
            .execute(request("tok", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(outcome, TradeOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhausts_to_rate_limited() {
        // One slot per minute, wall clock frozen: the window never
        // rolls, so retries exhaust.
        let h = harness(
            ExecutorConfig {
                max_retries: 2,
                retry_base_ms: 10,
                throttle: ThrottleConfig {
                    max_orders_per_minute: 1,
                    ..ThrottleConfig::default()
                },
                ..ExecutorConfig::default()
            },
            Arc::new(ManualClock::new(epoch())),
        );
        let first = h
            .executor
            .execute(request("a", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(first.is_filled());

        let second = h
            .executor
            .execute(request("b", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert_eq!(second, TradeOutcome::RateLimited);

        // Both attempts are journaled.
        assert_eq!(h.journal.iter_since(epoch()).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retry_succeeds_once_window_rolls() {
        let clock = Arc::new(ManualClock::new(epoch()));
        let handle: Clock = clock.clone();
        let h = harness(
            ExecutorConfig {
                max_retries: 5,
                retry_base_ms: 1000,
                throttle: ThrottleConfig {
                    max_orders_per_minute: 1,
                    ..ThrottleConfig::default()
                },
                ..ExecutorConfig::default()
            },
            handle,
        );

        let first = h
            .executor
            .execute(request("a", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(first.is_filled());

        // Roll the wall clock past the window while the second attempt
        // backs off (1s + 2s of tokio time).
        let roller = {
            let clock = clock.clone();
            tokio::spawn(async move {
                tokio::time::sleep(StdDuration::from_millis(2500)).await;
                clock.advance(chrono::Duration::seconds(61));
            })
        };

        let second = h
            .executor
            .execute(request("b", dec!(10)), dec!(3.00), false, None, None)
            .await
            .unwrap();
        assert!(second.is_filled());
        roller.await.unwrap();
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        // Pure arithmetic check on the shift-and-cap.
        let config = ExecutorConfig::default();
        let capped = config
            .retry_base_ms
            .saturating_mul(1u64 << 12)
            .min(config.retry_cap_ms);
        assert_eq!(capped, 300_000);
    }
}
