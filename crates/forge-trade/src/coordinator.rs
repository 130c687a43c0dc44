//! Applies resolutions to the store.
//!
//! Every write is guarded on the trade still being `active`, so a trade
//! resolved by the push path, the poll path or another replica is
//! resolved exactly once. The building follows its trade. A building
//! write that fails after the trade write succeeded is not remembered in
//! process: every poll sweeps the store for resolved trades whose
//! building is still `active`, which also covers writes lost to a crash
//! or a stop between the two writes.

use chrono::{DateTime, Utc};
use forge_core::{BuildingId, BuildingStatus, Trade, TradeStatus};
use forge_store::TradeStore;
use forge_telemetry::Metrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TradeResult;
use crate::resolver::Resolution;

/// Result of applying one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Resolution was `Active`; nothing written.
    Unchanged,
    Completed { reward: u64 },
    Liquidated,
    /// The guard rejected the write: someone else resolved the trade first.
    AlreadyResolved,
}

pub struct Coordinator {
    store: Arc<dyn TradeStore>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self { store }
    }

    /// Write `resolution` for `trade` as of `now`.
    ///
    /// A store failure on the trade write is returned; the trade is still
    /// active and the next poll will try again.
    pub async fn apply(
        &self,
        trade: &Trade,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> TradeResult<ApplyOutcome> {
        let applied = match resolution {
            Resolution::Active => return Ok(ApplyOutcome::Unchanged),
            Resolution::Completed { reward } => {
                self.store.resolve_completion(trade.id, reward, now).await
            }
            Resolution::Liquidated => self.store.resolve_liquidation(trade.id, now).await,
        };

        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                warn!(
                    trade_id = %trade.id,
                    outcome = resolution.as_str(),
                    error = %e,
                    "Trade resolution write failed, will retry on next poll"
                );
                Metrics::trade_store_failure("resolve");
                return Err(e.into());
            }
        };

        if !applied {
            debug!(trade_id = %trade.id, outcome = resolution.as_str(), "Trade already resolved");
            Metrics::trade_resolved("already_resolved");
            return Ok(ApplyOutcome::AlreadyResolved);
        }

        let (outcome, status) = match resolution {
            Resolution::Completed { reward } => {
                info!(
                    trade_id = %trade.id,
                    building_id = %trade.building_id,
                    user_id = %trade.user_id,
                    reward,
                    "Trade completed"
                );
                (ApplyOutcome::Completed { reward }, TradeStatus::Completed)
            }
            _ => {
                info!(
                    trade_id = %trade.id,
                    building_id = %trade.building_id,
                    user_id = %trade.user_id,
                    liquidation_price = %trade.liquidation_price,
                    "Trade liquidated"
                );
                (ApplyOutcome::Liquidated, TradeStatus::Liquidated)
            }
        };
        Metrics::trade_resolved(resolution.as_str());

        self.sync_building(trade.building_id, status).await;
        Ok(outcome)
    }

    /// Promote a pending trade to active. Returns whether this call did it.
    pub async fn activate(&self, trade: &Trade) -> TradeResult<bool> {
        let promoted = self
            .store
            .update_status(trade.id, TradeStatus::Pending, TradeStatus::Active)
            .await
            .map_err(|e| {
                Metrics::trade_store_failure("activate");
                e
            })?;
        if promoted {
            info!(trade_id = %trade.id, created_at = %trade.created_at, "Orphaned pending trade activated");
            Metrics::trade_activated();
        }
        Ok(promoted)
    }

    /// Bring every building left `active` behind its resolved trade in line.
    /// Returns how many are still out of sync.
    pub async fn sync_buildings(&self) -> TradeResult<usize> {
        let unsynced = self.store.find_unsynced_resolutions().await.map_err(|e| {
            Metrics::trade_store_failure("find_unsynced_resolutions");
            e
        })?;

        let mut remaining = 0;
        for trade in &unsynced {
            if !self.sync_building(trade.building_id, trade.status).await {
                remaining += 1;
            }
        }

        if !unsynced.is_empty() {
            info!(found = unsynced.len(), remaining, "Lagging buildings swept");
        }
        Metrics::building_sync_pending(remaining);
        Ok(remaining)
    }

    /// Mirror `status` onto the building. `false` only on a store error.
    async fn sync_building(&self, building_id: BuildingId, status: TradeStatus) -> bool {
        let target = BuildingStatus::mirroring(status);
        match self
            .store
            .update_building_status(building_id, BuildingStatus::Active, target)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                // Already mirrored by an earlier attempt, or collected back to idle.
                debug!(%building_id, %target, "Building not active, left unchanged");
                true
            }
            Err(e) => {
                warn!(%building_id, %target, error = %e, "Building sync failed, next poll sweeps it");
                Metrics::trade_store_failure("update_building_status");
                false
            }
        }
    }
}
