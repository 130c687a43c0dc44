//! Trade monitor.
//!
//! Merges two delivery paths into the resolver/coordinator pipeline:
//!
//! - Push: trade inserts/updates from a [`TradeFeed`]; only `active` rows
//!   are processed, each in its own task.
//! - Poll: every `poll_interval`, sync buildings still active behind a
//!   resolved trade, promote orphaned pending trades, then evaluate every
//!   active trade. The first poll runs immediately on start.
//!
//! The same trade may arrive on both paths. A push for a trade that is
//! already in flight is dropped (logged at debug); the next poll picks it
//! up again if it is still active. Correctness rests on the coordinator's
//! guarded writes, not on the in-flight set.
//!
//! Once stopped, nothing is written: a price lookup that completes after
//! `stop()` has its result discarded.

use chrono::Utc;
use dashmap::DashMap;
use forge_core::{Price, Trade, TradeId, TradeStatus};
use forge_oracle::PriceOracle;
use forge_store::{TradeFeed, TradeStore, TradeSubscription};
use forge_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::coordinator::{ApplyOutcome, Coordinator};
use crate::error::{TradeError, TradeResult};
use crate::resolver::{Resolution, TradeResolver};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Pending trades older than this are presumed orphaned and promoted.
    pub pending_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            pending_grace: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TradeMonitor {
    inner: Arc<MonitorInner>,
    run: Mutex<Option<RunHandle>>,
}

struct MonitorInner {
    config: MonitorConfig,
    store: Arc<dyn TradeStore>,
    feed: Option<Arc<dyn TradeFeed>>,
    oracle: Arc<dyn PriceOracle>,
    resolver: Arc<dyn TradeResolver>,
    coordinator: Coordinator,
    in_flight: DashMap<TradeId, Instant>,
}

impl TradeMonitor {
    /// `feed` is optional; without it the monitor runs on the poll path alone.
    pub fn new(
        config: MonitorConfig,
        store: Arc<dyn TradeStore>,
        feed: Option<Arc<dyn TradeFeed>>,
        oracle: Arc<dyn PriceOracle>,
        resolver: Arc<dyn TradeResolver>,
    ) -> Self {
        let coordinator = Coordinator::new(store.clone());
        Self {
            inner: Arc::new(MonitorInner {
                config,
                store,
                feed,
                oracle,
                resolver,
                coordinator,
                in_flight: DashMap::new(),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.run.lock().is_some() {
            MonitorState::Running
        } else {
            MonitorState::Stopped
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Subscribe to the push path and start polling.
    ///
    /// A failed subscription is logged and the monitor runs poll-only.
    pub async fn start(&self) -> TradeResult<()> {
        if self.run.lock().is_some() {
            return Err(TradeError::AlreadyRunning);
        }

        let subscription = match &self.inner.feed {
            Some(feed) => match feed.subscribe().await {
                Ok(sub) => Some(sub),
                Err(e) => {
                    warn!(error = %e, "Trade push subscription failed, running poll-only");
                    None
                }
            },
            None => None,
        };

        let mut run = self.run.lock();
        if run.is_some() {
            // Lost a race with a concurrent start.
            return Err(TradeError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.inner.clone(), cancel.clone(), subscription));
        *run = Some(RunHandle { cancel, task });

        info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            pending_grace_ms = self.inner.config.pending_grace.as_millis() as u64,
            push = self.inner.feed.is_some(),
            "TradeMonitor started"
        );
        Ok(())
    }

    /// Unsubscribe, stop polling and clear bookkeeping. No-op when stopped.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().take() else {
            return;
        };
        run.cancel.cancel();
        if let Err(e) = run.task.await {
            warn!(error = %e, "TradeMonitor loop ended abnormally");
        }
        self.inner.in_flight.clear();
        Metrics::monitor_in_flight(0);
        info!("TradeMonitor stopped");
    }

    /// Run until `shutdown` fires, then stop.
    pub async fn run_until(&self, shutdown: CancellationToken) -> TradeResult<()> {
        self.start().await?;
        shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }

    /// One poll pass, outside the timer. Used by tests and the CLI.
    pub async fn poll_once(&self) {
        self.inner.poll(&CancellationToken::new()).await;
    }
}

// ============================================================================
// Loop
// ============================================================================

async fn run_loop(
    inner: Arc<MonitorInner>,
    cancel: CancellationToken,
    mut subscription: Option<TradeSubscription>,
) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            _ = ticker.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = inner.poll(&cancel) => {}
                }
            }

            change = next_change(&mut subscription) => match change {
                Some(trade) => inner.clone().on_push(trade, cancel.clone()),
                None => {
                    warn!("Trade push stream ended, continuing on poll only");
                    subscription = None;
                }
            },
        }
    }

    if let Some(sub) = subscription {
        sub.unsubscribe();
    }
    debug!("TradeMonitor loop exited");
}

async fn next_change(subscription: &mut Option<TradeSubscription>) -> Option<Trade> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Removes the trade from the in-flight set when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<TradeId, Instant>,
    id: TradeId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a DashMap<TradeId, Instant>, id: TradeId) -> Option<Self> {
        match in_flight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(Self { in_flight, id })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

impl MonitorInner {
    fn on_push(self: Arc<Self>, trade: Trade, cancel: CancellationToken) {
        Metrics::monitor_push_delivery();
        if !trade.is_active() {
            trace!(trade_id = %trade.id, status = %trade.status, "Ignoring non-active push");
            return;
        }
        debug!(trade_id = %trade.id, "Active trade pushed");

        tokio::spawn(async move {
            let price = if self.resolver.needs_price() {
                self.lookup_price(&trade.symbol).await
            } else {
                None
            };
            self.process(&trade, price, &cancel).await;
        });
    }

    async fn poll(&self, cancel: &CancellationToken) {
        let started = Instant::now();

        if let Err(e) = self.coordinator.sync_buildings().await {
            warn!(error = %e, "Building sync sweep failed");
        }
        self.promote_orphans(cancel).await;

        let trades = match self.store.find_active_trades().await {
            Ok(trades) => trades,
            Err(e) => {
                warn!(error = %e, "Failed to fetch active trades");
                Metrics::trade_store_failure("find_active_trades");
                return;
            }
        };

        let prices = if self.resolver.needs_price() {
            self.batch_prices(&trades).await
        } else {
            HashMap::new()
        };

        for trade in &trades {
            if cancel.is_cancelled() {
                return;
            }
            let price = prices.get(&trade.symbol).copied().flatten();
            self.process(trade, price, cancel).await;
        }

        let active: HashSet<TradeId> = trades.iter().map(|t| t.id).collect();
        self.in_flight.retain(|id, _| active.contains(id));
        Metrics::monitor_in_flight(self.in_flight.len());

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Metrics::monitor_poll_duration(elapsed_ms);
        debug!(active = trades.len(), elapsed_ms, "Poll complete");
    }

    async fn promote_orphans(&self, cancel: &CancellationToken) {
        let pending = match self.store.find_trades_by_status(TradeStatus::Pending).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to fetch pending trades");
                Metrics::trade_store_failure("find_trades_by_status");
                return;
            }
        };

        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.config.pending_grace)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        for trade in pending.iter().filter(|t| now - t.created_at >= grace) {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.coordinator.activate(trade).await {
                warn!(trade_id = %trade.id, error = %e, "Failed to activate pending trade");
            }
        }
    }

    /// One oracle call per distinct symbol.
    async fn batch_prices(&self, trades: &[Trade]) -> HashMap<String, Option<Price>> {
        let mut prices = HashMap::new();
        for trade in trades {
            if !prices.contains_key(&trade.symbol) {
                let price = self.lookup_price(&trade.symbol).await;
                prices.insert(trade.symbol.clone(), price);
            }
        }
        prices
    }

    async fn lookup_price(&self, symbol: &str) -> Option<Price> {
        match self.oracle.current_price(symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(symbol, error = %e, "No price available, trades stay active");
                None
            }
        }
    }

    async fn process(&self, trade: &Trade, price: Option<Price>, cancel: &CancellationToken) {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, trade.id) else {
            debug!(trade_id = %trade.id, "Trade already in flight, skipped until next poll");
            return;
        };

        let now = Utc::now();
        let resolution = self.resolver.resolve(trade, price, now);
        if resolution == Resolution::Active {
            return;
        }

        if cancel.is_cancelled() {
            debug!(trade_id = %trade.id, outcome = resolution.as_str(), "Monitor stopped, discarding resolution");
            return;
        }

        match self.coordinator.apply(trade, resolution, now).await {
            Ok(ApplyOutcome::AlreadyResolved) => {
                debug!(trade_id = %trade.id, "Resolution lost to another writer");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(trade_id = %trade.id, error = %e, "Resolution not applied");
            }
        }
    }
}
