//! Engine wiring and the execution worker.
//!
//! Control flow: the market source feeds the state machine; ticks from
//! the venue stream update it; the transition sweep queues markets that
//! turn Eligible; one execution worker drains the queue through the
//! pipeline gate -> allocator -> executor -> journal/metrics, and the
//! recycler releases capital after settlement lag. Exactly one worker
//! consumes the queue, which keeps rate limiting and dedupe local
//! reasoning problems.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use snipe_capital::{AllocationOutcome, CapitalAllocator, CapitalError, Recycler};
use snipe_core::{
    Action, Clock, CorrelationId, GateReason, MarketInfo, MarketPhase, OrderRequest, PayoutModel,
    Price, PriceTick, TokenId, TradeOutcome, Usd,
};
use snipe_detector::{EligibilityEvaluator, SnipeSignal};
use snipe_executor::{Executor, MockVenue, VenueClient};
use snipe_journal::{JournalEntry, ReleaseRecord, TradeJournal, TradeRecord};
use snipe_market::{ExpiryQueue, MarketStateMachine, Transition};
use snipe_risk::RiskGate;
use snipe_telemetry::{Metrics, MetricsCollector};

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::source::MarketSource;

/// Strategy tag stamped on every order and journal record.
const STRATEGY: &str = "expiry-snipe";

/// How the engine finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Clean shutdown.
    Clean,
    /// A kill-switch halt outlasted the configured retention.
    KillSwitchTimeout,
}

impl ExitStatus {
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::KillSwitchTimeout => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FillInfo {
    size: Usd,
    price: Price,
}

/// The assembled engine.
pub struct Engine {
    config: EngineConfig,
    clock: Clock,
    machine: MarketStateMachine,
    queue: Mutex<ExpiryQueue>,
    evaluator: EligibilityEvaluator,
    gate: RiskGate,
    allocator: Arc<CapitalAllocator>,
    recycler: Recycler,
    journal: Arc<TradeJournal>,
    metrics: Arc<MetricsCollector>,
    executor: Executor,
    payout: PayoutModel,
    venue: Arc<dyn VenueClient>,
    /// Fill bookkeeping for settlement P&L, keyed by market.
    fills: Mutex<HashMap<TokenId, FillInfo>>,
    /// Monotonic stamp of the latest tick per market, for latency.
    tick_mono: Mutex<HashMap<TokenId, u64>>,
    halted_since: Mutex<Option<DateTime<Utc>>>,
    pending_exit: Mutex<Option<ExitStatus>>,
    pending_fatal: Mutex<Option<String>>,
    monitor_ticks: Mutex<u64>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Wire all components against a venue client and clock.
    pub fn new(
        config: EngineConfig,
        venue: Arc<dyn VenueClient>,
        clock: Clock,
    ) -> AppResult<Self> {
        config.validate()?;

        let allocator = Arc::new(
            CapitalAllocator::new(config.capital.clone(), clock.clone(), config.initial_bankroll)
                .map_err(|e| AppError::Config(e.to_string()))?,
        );
        let recycler = Recycler::new(
            allocator.clone(),
            config.capital.recycle_delay_secs,
            1024,
        );
        let journal = Arc::new(TradeJournal::open(config.journal.clone())?);
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let executor = Executor::new(
            venue.clone(),
            journal.clone(),
            metrics.clone(),
            clock.clone(),
            config.effective_executor(),
        );
        let gate = RiskGate::new(config.risk.clone(), clock.clone(), config.initial_bankroll);
        let evaluator = EligibilityEvaluator::new(config.eligibility.clone());
        let payout = PayoutModel::with_fee_rate(config.runtime.fee_rate);
        let machine = MarketStateMachine::new(config.market.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            clock,
            machine,
            queue: Mutex::new(ExpiryQueue::new()),
            evaluator,
            gate,
            allocator,
            recycler,
            journal,
            metrics,
            executor,
            payout,
            venue,
            fills: Mutex::new(HashMap::new()),
            tick_mono: Mutex::new(HashMap::new()),
            halted_since: Mutex::new(None),
            pending_exit: Mutex::new(None),
            pending_fatal: Mutex::new(None),
            monitor_ticks: Mutex::new(0),
            shutdown,
        })
    }

    /// Convenience constructor for rehearsals against the mock venue.
    pub fn with_mock_venue(config: EngineConfig, clock: Clock) -> AppResult<(Self, Arc<MockVenue>)> {
        let venue = Arc::new(MockVenue::default());
        let engine = Self::new(config, venue.clone(), clock)?;
        Ok((engine, venue))
    }

    /// Track newly discovered markets. Already-tracked tokens are
    /// ignored; sources may re-report.
    pub fn ingest_markets(&self, markets: Vec<MarketInfo>) {
        for info in markets {
            match self.machine.add_market(info) {
                Ok(()) => {}
                Err(snipe_market::MarketError::AlreadyTracked(_)) => {}
                Err(e) => warn!(?e, "market ingest failed"),
            }
        }
    }

    /// Apply one tick from the venue stream.
    pub fn on_tick(&self, tick: PriceTick) {
        self.tick_mono
            .lock()
            .insert(tick.token_id.clone(), self.clock.monotonic_ms());
        match self
            .machine
            .update_price(&tick.token_id, tick.bid, tick.ask, tick.at)
        {
            Ok(()) => {}
            Err(snipe_market::MarketError::NotFound(_)) => {
                debug!(token_id = %tick.token_id, "tick for untracked market");
            }
            Err(e) => warn!(?e, "tick rejected"),
        }
    }

    /// Run one transition sweep: queue new Eligible markets, schedule
    /// settlement for markets that entered Reconciling, then release
    /// whatever settlement lag has expired.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let predicate = |snap: &snipe_core::MarketSnapshot, at: DateTime<Utc>| {
            self.evaluator.holds(snap, at)
        };
        let transitions = self.machine.check_transitions(now, &predicate);

        for transition in &transitions {
            match transition.to {
                MarketPhase::Reconciling => {
                    self.schedule_settlement(&transition.token_id, now);
                }
                MarketPhase::Watching | MarketPhase::OnHold | MarketPhase::Done => {
                    // No longer actionable; drop any stale queue entry.
                    self.queue.lock().remove(&transition.token_id);
                }
                _ => {}
            }
        }

        // Every currently-Eligible market gets (or keeps) a queue
        // entry, so gate-rejected markets are retried on later sweeps.
        // Pushed in discovery order so expiry ties stay stable.
        let mut eligible = self.machine.get_markets_by_state(MarketPhase::Eligible);
        eligible.sort_by_key(|s| s.discovery_seq);
        for snap in eligible {
            let mut queue = self.queue.lock();
            if !queue.contains(&snap.token_id) {
                queue.push(snap.token_id.clone(), snap.end_time);
            }
        }

        self.release_due_settlements(now);

        Metrics::queue_depth(self.queue.lock().len());
        Metrics::reserved_capital_cents(
            (self.allocator.total_allocated().inner() * rust_decimal::Decimal::from(100))
                .to_i64()
                .unwrap_or(0),
        );
        transitions
    }

    /// One execution worker iteration. Returns the token processed, or
    /// `None` when the queue was empty or the engine is shutting down.
    pub async fn try_execute_next(&self) -> AppResult<Option<TokenId>> {
        if self.is_shutting_down() {
            return Ok(None);
        }
        let Some(token_id) = self.queue.lock().pop() else {
            return Ok(None);
        };
        let now = self.clock.now_utc();

        // Authoritative state is re-read after the pop; stale heap
        // entries are dropped here.
        let snapshot = match self.machine.snapshot(&token_id) {
            Ok(s) => s,
            Err(_) => {
                debug!(token_id = %token_id, "queued market vanished");
                return Ok(Some(token_id));
            }
        };
        if snapshot.phase != MarketPhase::Eligible {
            debug!(token_id = %token_id, phase = %snapshot.phase, "stale queue entry dropped");
            return Ok(Some(token_id));
        }

        let signal = match self.evaluator.evaluate(&snapshot, now) {
            Ok(s) => s,
            Err(reason) => {
                self.metrics.record_missed(&token_id, &reason.to_string());
                return Ok(Some(token_id));
            }
        };

        let stake = self.config.runtime.stake_per_market;
        let feed_age = self.machine.max_watched_tick_age_ms(now);
        let view = self.allocator.exposure_view(&token_id);
        // The gate sees the amount that would actually be reserved;
        // grants smaller than the stake are expected, not denials.
        let quoted = self.allocator.preview_grant(&token_id, stake);
        let admit_amount = if quoted.is_positive() { quoted } else { stake };
        if let Err(reason) = self
            .gate
            .pre_execution_check(&token_id, admit_amount, feed_age, &view)
        {
            self.record_gate_rejection(&token_id, &signal, stake, reason)?;
            return Ok(Some(token_id));
        }

        let (outcome, granted, children) =
            self.allocator.request_allocation(&token_id, stake, STRATEGY);
        if !outcome.is_granted() {
            self.record_gate_rejection(&token_id, &signal, stake, allocation_reason(outcome))?;
            return Ok(Some(token_id));
        }

        if let Err(e) = self.machine.mark_execution_started(&token_id, granted, now) {
            warn!(?e, token_id = %token_id, "market moved before execution; freeing reservation");
            self.allocator.release_allocation(&token_id, Usd::ZERO)?;
            return Ok(Some(token_id));
        }

        // Journaled only when the allocator clamped the stake; an even
        // split of a full grant is not a reduced request.
        let requested = (granted != stake).then_some(stake);
        self.dispatch_children(&token_id, &snapshot, &signal, granted, children, requested)
            .await?;
        Ok(Some(token_id))
    }

    /// Background risk-monitor step: feed health, rpc lag, day
    /// rollover, halt retention, metric pruning. Returns an exit status
    /// once a halt has outlasted its retention.
    pub fn risk_monitor_step(&self) -> Option<ExitStatus> {
        let now = self.clock.now_utc();

        if let Some(age) = self.machine.max_watched_tick_age_ms(now) {
            self.gate.observe_feed_age(age);
        }
        self.gate.observe_ack_p95(self.metrics.p95_ack_ms());
        self.gate.roll_day_if_needed(self.allocator.bankroll());
        self.gate.relog_active_halts();
        self.metrics.prune(now);

        for kind in ["stale_feed", "rpc_lag", "max_orders", "daily_loss", "manual"] {
            Metrics::kill_switch(kind, false);
        }
        for (kind, _) in self.gate.status().active {
            Metrics::kill_switch(&kind.to_string(), true);
        }

        // Alerts logged once a minute, not on every step.
        {
            let mut ticks = self.monitor_ticks.lock();
            *ticks += 1;
            if *ticks % 60 == 0 {
                for alert in self.metrics.alerts(&self.config.alerts) {
                    warn!(?alert, "metrics alert");
                }
            }
        }

        match self.gate.halted() {
            Some(reason) => {
                let mut halted = self.halted_since.lock();
                let since = *halted.get_or_insert(now);
                if (now - since).num_seconds() >= self.config.runtime.halt_exit_secs {
                    error!(
                        %reason,
                        halted_secs = (now - since).num_seconds(),
                        "kill switch halt outlasted retention"
                    );
                    return Some(ExitStatus::KillSwitchTimeout);
                }
            }
            None => {
                *self.halted_since.lock() = None;
            }
        }
        None
    }

    /// Signal every cooperative task to stop.
    pub fn shutdown(&self) {
        info!("shutdown signal");
        let _ = self.shutdown.send(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.subscribe().borrow()
    }

    /// Run until shutdown. Spawns the background tasks and the single
    /// execution worker; on the shutdown signal, new admissions stop,
    /// in-flight work gets the grace period, and reservations for
    /// still-Executing markets stay booked.
    pub async fn run(self: Arc<Self>, source: Box<dyn MarketSource>) -> AppResult<ExitStatus> {
        info!(
            dry_run = self.config.effective_executor().dry_run,
            bankroll = %self.allocator.bankroll(),
            "engine starting"
        );

        let intake = self.clone().spawn_intake(source);
        let sweeper = self.clone().spawn_sweeper();
        let monitor = self.clone().spawn_monitor();
        let reconciler = (!self.config.wallet_address.is_empty())
            .then(|| self.clone().spawn_reconciler());
        let worker = self.clone().spawn_worker();

        // Wait for the shutdown signal.
        let mut rx = self.shutdown.subscribe();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }

        // Grace period: let the worker finish its in-flight dispatch.
        let grace = StdDuration::from_millis(self.config.runtime.shutdown_grace_ms);
        let worker_result = match tokio::time::timeout(grace, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(AppError::Fatal(format!("worker panicked: {join_err}"))),
            Err(_) => {
                warn!("worker did not drain within shutdown grace");
                Ok(())
            }
        };
        let _ = tokio::time::timeout(grace, async {
            let _ = tokio::join!(intake, sweeper, monitor);
            if let Some(handle) = reconciler {
                let _ = handle.await;
            }
        })
        .await;

        let executing = self.machine.get_markets_by_state(MarketPhase::Executing);
        for market in &executing {
            info!(
                token_id = %market.token_id,
                reserved = %market.reserved_capital,
                "reservation stays booked across shutdown"
            );
        }

        worker_result?;
        if let Some(fatal) = self.pending_fatal.lock().take() {
            return Err(AppError::Fatal(fatal));
        }
        let status = self.pending_exit.lock().take().unwrap_or(ExitStatus::Clean);
        info!(code = status.code(), "engine stopped");
        Ok(status)
    }

    // Accessors used by the binary and tests.

    #[must_use]
    pub fn machine(&self) -> &MarketStateMachine {
        &self.machine
    }

    #[must_use]
    pub fn allocator(&self) -> &CapitalAllocator {
        &self.allocator
    }

    #[must_use]
    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    #[must_use]
    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Force-release a settled market immediately (operator path).
    pub fn force_recycle(&self, token_id: &TokenId) -> AppResult<()> {
        let released = self.recycler.force_recycle(token_id)?;
        self.finish_settlement(&released.token_id, released.amount, released.pnl)?;
        Ok(())
    }

    /// Reconcile the allocator's bankroll against the venue wallet.
    ///
    /// No-op without a configured wallet. The sync is refused while any
    /// reservation is live; the next cycle retries once the books are
    /// quiet. Venue query failures are logged, not fatal.
    pub async fn reconcile_wallet(&self) -> AppResult<()> {
        let wallet = self.config.wallet_address.clone();
        if wallet.is_empty() {
            return Ok(());
        }

        let venue = self.venue.clone();
        let balance = match tokio::task::spawn_blocking(move || venue.usdc_balance(&wallet)).await
        {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                warn!(?e, "wallet balance query failed");
                return Ok(());
            }
            Err(join_err) => {
                return Err(AppError::Fatal(format!("worker pool failure: {join_err}")));
            }
        };

        match self.allocator.sync_with_wallet(balance) {
            Ok(updated) => info!(bankroll = %updated, "bankroll reconciled with wallet"),
            Err(CapitalError::ReservationsPending { pending }) => {
                debug!(pending, "wallet sync deferred while capital is reserved");
            }
            Err(e) => warn!(?e, %balance, "wallet sync refused"),
        }
        Ok(())
    }

    // Internal pipeline pieces.

    async fn dispatch_children(
        &self,
        token_id: &TokenId,
        snapshot: &snipe_core::MarketSnapshot,
        signal: &SnipeSignal,
        granted: Usd,
        children: Vec<Usd>,
        requested: Option<Usd>,
    ) -> AppResult<()> {
        let tick_mono = self.tick_mono.lock().get(token_id).copied();
        let mut filled_total = Usd::ZERO;
        let mut fill_price = signal.ask;
        // One correlation id per grant: split children are one logical
        // order, for both the journal and the dedupe table.
        let batch_correlation = CorrelationId::new(self.clock.now_utc().timestamp_millis());

        for child in children {
            let request = OrderRequest::new(
                token_id.clone(),
                signal.side,
                Action::Buy,
                child,
                signal.ask,
                STRATEGY,
                granted,
                batch_correlation.clone(),
            )?;
            self.gate.order_opened();
            let result = self
                .executor
                .execute(
                    request,
                    signal.edge_cents,
                    snapshot.negative_risk,
                    tick_mono,
                    requested,
                )
                .await;
            self.gate.order_closed();

            match result? {
                TradeOutcome::Filled { price, size } => {
                    filled_total += size;
                    fill_price = price;
                    self.gate
                        .post_execution_record(token_id, true, Usd::ZERO, None);
                }
                other => {
                    if other.is_venue_failure() {
                        let _ = self.machine.mark_failure(
                            token_id,
                            other.label(),
                            self.clock.now_utc(),
                        );
                        self.gate
                            .post_execution_record(token_id, false, Usd::ZERO, None);
                    }
                    debug!(
                        token_id = %token_id,
                        outcome = other.label(),
                        "child order failed, aborting tail"
                    );
                    break;
                }
            }
        }

        if filled_total.is_zero() {
            // Nothing filled: free the reservation and put the market
            // back under watch for re-evaluation.
            let released = self.allocator.release_allocation(token_id, Usd::ZERO)?;
            self.journal.append(JournalEntry::Release(ReleaseRecord {
                id: 0,
                wall_time: self.clock.now_utc(),
                token_id: token_id.clone(),
                released,
                pnl: Usd::ZERO,
            }))?;
            self.machine
                .mark_execution_abandoned(token_id, self.clock.now_utc())?;
        } else {
            self.fills.lock().insert(
                token_id.clone(),
                FillInfo {
                    size: filled_total,
                    price: fill_price,
                },
            );
        }
        Ok(())
    }

    /// A market entered Reconciling: compute settlement P&L under the
    /// payout model and queue the delayed release.
    fn schedule_settlement(&self, token_id: &TokenId, now: DateTime<Utc>) {
        let pnl = self
            .fills
            .lock()
            .get(token_id)
            .map(|fill| self.payout.win_pnl(fill.size, fill.price))
            .unwrap_or(Usd::ZERO);

        if let Err(e) = self.recycler.schedule(token_id.clone(), pnl, now) {
            warn!(?e, token_id = %token_id, "recycler full, releasing immediately");
            if let Ok(released) = self.recycler.force_recycle(token_id) {
                let _ = self.finish_settlement(&released.token_id, released.amount, released.pnl);
            }
        }
    }

    fn release_due_settlements(&self, now: DateTime<Utc>) {
        for released in self.recycler.tick(now) {
            if let Err(e) = self.finish_settlement(&released.token_id, released.amount, released.pnl)
            {
                // A settlement that cannot be journaled is fatal: the
                // ledger may no longer match the books.
                error!(?e, token_id = %released.token_id, "settlement bookkeeping failed");
                *self.pending_fatal.lock() = Some(e.to_string());
                self.shutdown();
                return;
            }
        }
    }

    fn finish_settlement(&self, token_id: &TokenId, released: Usd, pnl: Usd) -> AppResult<()> {
        let now = self.clock.now_utc();
        self.machine.mark_resolution(token_id, pnl, now)?;
        self.journal.append(JournalEntry::Release(ReleaseRecord {
            id: 0,
            wall_time: now,
            token_id: token_id.clone(),
            released,
            pnl,
        }))?;
        self.metrics
            .record_settlement(token_id, pnl.inner().to_f64().unwrap_or(0.0));
        self.gate.post_execution_record(token_id, true, pnl, None);
        self.fills.lock().remove(token_id);
        info!(token_id = %token_id, %released, %pnl, "settled");
        Ok(())
    }

    fn record_gate_rejection(
        &self,
        token_id: &TokenId,
        signal: &SnipeSignal,
        stake: Usd,
        reason: GateReason,
    ) -> AppResult<()> {
        Metrics::gate_denied(&reason.to_string());
        self.metrics.record_missed(token_id, &reason.to_string());
        self.journal.append(JournalEntry::Trade(TradeRecord {
            id: 0,
            wall_time: self.clock.now_utc(),
            correlation_id: CorrelationId::new(self.clock.now_utc().timestamp_millis()).to_string(),
            token_id: token_id.clone(),
            side: signal.side,
            action: Action::Buy,
            size: stake,
            price: signal.ask,
            outcome: TradeOutcome::RejectedByGate { reason },
            tick_to_decision_ms: 0.0,
            decision_to_ack_ms: 0.0,
            expected_edge_cents: signal.edge_cents,
            requested_size: None,
            realized_pnl: None,
        }))?;
        Ok(())
    }

    // Background tasks.

    fn spawn_intake(
        self: Arc<Self>,
        mut source: Box<dyn MarketSource>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_millis(
                self.config.runtime.market_poll_interval_ms,
            ));
            let mut rx = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let markets = source.poll();
                        if markets.is_empty() {
                            continue;
                        }
                        let tokens: Vec<TokenId> =
                            markets.iter().map(|m| m.token_id.clone()).collect();
                        info!(count = tokens.len(), "markets discovered");
                        self.ingest_markets(markets);
                        let receiver = self.venue.subscribe_price_ticks(&tokens);
                        self.clone().spawn_tick_bridge(receiver);
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    }

    /// Bridge the venue's blocking tick receiver onto the engine.
    /// Ticks for a given token arrive on one receiver, so per-token
    /// ordering is preserved.
    fn spawn_tick_bridge(self: Arc<Self>, receiver: std::sync::mpsc::Receiver<PriceTick>) {
        tokio::task::spawn_blocking(move || loop {
            if self.is_shutting_down() {
                break;
            }
            match receiver.recv_timeout(StdDuration::from_millis(200)) {
                Ok(tick) => self.on_tick(tick),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });
    }

    fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_millis(
                self.config.runtime.transition_sweep_interval_ms,
            ));
            let mut rx = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = self.clock.now_utc();
                        self.sweep(now);
                        self.machine.purge_done_older_than(
                            Duration::hours(self.config.runtime.done_retention_hours),
                            now,
                        );
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    }

    fn spawn_monitor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(1));
            let mut rx = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Some(status) = self.risk_monitor_step() {
                            *self.pending_exit.lock() = Some(status);
                            self.shutdown();
                            break;
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    }

    /// Periodic bankroll reconciliation against the venue wallet. The
    /// first tick fires at startup so the engine trades from the real
    /// balance.
    fn spawn_reconciler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(StdDuration::from_secs(
                self.config.runtime.wallet_sync_interval_secs,
            ));
            let mut rx = self.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.reconcile_wallet().await {
                            error!(?e, "wallet reconciliation failed");
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    }

    fn spawn_worker(self: Arc<Self>) -> tokio::task::JoinHandle<AppResult<()>> {
        tokio::spawn(async move {
            let idle = StdDuration::from_millis(self.config.runtime.worker_idle_ms);
            let mut rx = self.shutdown.subscribe();
            loop {
                if *rx.borrow() {
                    break;
                }
                match self.try_execute_next().await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(idle) => {}
                            _ = rx.changed() => break,
                        }
                    }
                    Err(e) => {
                        error!(?e, "fatal executor error");
                        self.shutdown();
                        return Err(e);
                    }
                }
            }
            Ok(())
        })
    }
}

fn allocation_reason(outcome: AllocationOutcome) -> GateReason {
    match outcome {
        AllocationOutcome::MarketLimitExceeded => GateReason::ExposureCapMarket,
        AllocationOutcome::TotalLimitExceeded => GateReason::ExposureCapTotal,
        AllocationOutcome::AlreadyAllocated => GateReason::AlreadyAllocated,
        AllocationOutcome::Granted
        | AllocationOutcome::InsufficientCapital
        | AllocationOutcome::InvalidAmount => GateReason::InsufficientCapital,
    }
}
