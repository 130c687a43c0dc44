//! Application wiring and worker supervision.
//!
//! Store access is built once here and handed to every component as a
//! shared capability. Each worker runs until ctrl-c or until the
//! application's shutdown token is cancelled.

use crate::config::{AppConfig, StoreBackend};
use crate::error::AppResult;
use crate::health;
use forge_core::{CharacterId, EnrollmentId, UserId};
use forge_dungeon::{ClaimReceipt, DungeonCycleManager, RewardSettlement};
use forge_oracle::{CachedOracle, FixedPriceOracle, HttpPriceSource, PriceOracle};
use forge_realtime::RealtimeTradeFeed;
use forge_store::{
    BalanceStore, DungeonStore, MemoryStore, PostgrestStore, TradeFeed, TradeStore,
};
use forge_trade::{build_resolver, TradeMonitor};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Store capabilities shared by the workers.
#[derive(Clone)]
pub struct Stores {
    pub trades: Arc<dyn TradeStore>,
    /// Push path; `None` runs the monitor on polling alone.
    pub feed: Option<Arc<dyn TradeFeed>>,
    pub dungeon: Arc<dyn DungeonStore>,
    pub balances: Arc<dyn BalanceStore>,
}

impl Stores {
    /// One in-process store serving every capability.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            trades: store.clone(),
            feed: Some(store.clone() as Arc<dyn TradeFeed>),
            dungeon: store.clone(),
            balances: store,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        match config.store.backend {
            StoreBackend::Memory => {
                warn!("Using the in-memory store; nothing is persisted");
                Ok(Self::memory(Arc::new(MemoryStore::new())))
            }
            StoreBackend::Postgrest => {
                let store = Arc::new(PostgrestStore::new(&config.store.postgrest())?);
                let feed: Option<Arc<dyn TradeFeed>> = match config.store.realtime() {
                    Some(realtime) => Some(Arc::new(RealtimeTradeFeed::new(realtime))),
                    None => {
                        warn!("No realtime_url configured, trade monitor runs poll-only");
                        None
                    }
                };
                Ok(Self {
                    trades: store.clone(),
                    feed,
                    dungeon: store.clone(),
                    balances: store,
                })
            }
        }
    }
}

pub struct Application {
    config: AppConfig,
    stores: Stores,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let stores = Stores::from_config(&config)?;
        Ok(Self::with_stores(config, stores))
    }

    pub fn with_stores(config: AppConfig, stores: Stores) -> Self {
        Self {
            config,
            stores,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cancelling this token stops whichever worker is running.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Price oracle per config: HTTP ticker behind a cache when a URL is
    /// set, otherwise the configured default prices.
    pub fn build_oracle(&self) -> AppResult<Arc<dyn PriceOracle>> {
        let oracle = &self.config.oracle;
        if oracle.url.is_empty() {
            info!(
                symbols = oracle.default_prices.len(),
                "No ticker configured, serving fixed default prices"
            );
            return Ok(Arc::new(FixedPriceOracle::with_prices(oracle.default_prices())));
        }
        let source = HttpPriceSource::new(oracle.url.clone())?;
        Ok(Arc::new(CachedOracle::new(source, oracle.cached())))
    }

    // ------------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------------

    /// Run the trade monitor until shutdown.
    pub async fn run_trade_worker(&self) -> AppResult<()> {
        let trade = &self.config.trade;
        let resolver = build_resolver(
            trade.resolver,
            trade.risk_tiers.clone(),
            trade.liquidation_probability,
        )?;
        let monitor = TradeMonitor::new(
            trade.monitor(),
            self.stores.trades.clone(),
            self.stores.feed.clone(),
            self.build_oracle()?,
            resolver,
        );
        info!(resolver = ?trade.resolver, push = self.stores.feed.is_some(), "Starting trade worker");

        let health = self.spawn_health("trade");
        monitor.start().await?;
        self.wait_for_shutdown().await;
        monitor.stop().await;
        self.join_health(health).await;

        info!("Trade worker stopped");
        Ok(())
    }

    /// Run dungeon cycles until shutdown. The open run is left open and
    /// recovered on the next start.
    pub async fn run_dungeon_worker(&self) -> AppResult<()> {
        let manager = Arc::new(DungeonCycleManager::new(
            self.config.dungeon.cycle(),
            self.stores.dungeon.clone(),
        )?);
        info!("Starting dungeon worker");

        let health = self.spawn_health("dungeon");
        let cycles = tokio::spawn({
            let manager = manager.clone();
            let shutdown = self.shutdown.clone();
            async move { manager.run(shutdown).await }
        });

        self.wait_for_shutdown().await;
        if let Err(e) = cycles.await {
            error!(error = %e, "Dungeon cycle task ended abnormally");
        }
        self.join_health(health).await;

        info!("Dungeon worker stopped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------------

    fn settlement(&self) -> RewardSettlement {
        RewardSettlement::new(
            self.stores.dungeon.clone(),
            self.stores.balances.clone(),
            self.config.dungeon.purge_events_on_claim,
        )
    }

    pub async fn claim(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> AppResult<ClaimReceipt> {
        Ok(self.settlement().claim(enrollment_id, user_id).await?)
    }

    pub async fn claim_all(
        &self,
        character_id: CharacterId,
        user_id: UserId,
    ) -> AppResult<ClaimReceipt> {
        Ok(self.settlement().claim_all(character_id, user_id).await?)
    }

    // ------------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------------

    async fn wait_for_shutdown(&self) {
        tokio::select! {
            () = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!(error = %e, "Failed to listen for ctrl-c, shutting down"),
                }
                self.shutdown.cancel();
            }
        }
    }

    fn spawn_health(&self, worker: &'static str) -> Option<JoinHandle<()>> {
        let port = self.config.telemetry.health_port;
        if port == 0 {
            return None;
        }
        let shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = health::serve(worker, port, shutdown).await {
                error!(error = %e, port, "Health endpoint failed");
            }
        }))
    }

    async fn join_health(&self, handle: Option<JoinHandle<()>>) {
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Health endpoint task ended abnormally");
            }
        }
    }
}
