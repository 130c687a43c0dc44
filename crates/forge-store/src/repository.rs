//! Repository interfaces.
//!
//! Components never talk to a concrete backend. `forge-engine` builds one
//! backend at startup and hands it around as `Arc<dyn TradeStore>` etc.
//!
//! Every method returning `bool` (or `Option`) is a guarded update: it
//! reports whether the row was still in the expected prior state and the
//! write applied. `false` is not an error; it means another writer got
//! there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_core::{
    BuildingId, BuildingStatus, Character, CharacterDungeon, CharacterId, DungeonEvent, DungeonRun,
    EnrollmentId, RunId, Trade, TradeId, TradeStatus, UserId,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;

// ============================================================================
// Trades
// ============================================================================

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// All trades with status `active`.
    async fn find_active_trades(&self) -> StoreResult<Vec<Trade>>;

    /// All trades with the given status.
    async fn find_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>>;

    async fn find_by_id(&self, id: TradeId) -> StoreResult<Option<Trade>>;

    /// Set `status = to` only if the trade is currently `from`.
    async fn update_status(&self, id: TradeId, from: TradeStatus, to: TradeStatus)
        -> StoreResult<bool>;

    /// active → completed with `reward` and `resolved_at = at`.
    async fn resolve_completion(&self, id: TradeId, reward: u64, at: DateTime<Utc>)
        -> StoreResult<bool>;

    /// active → liquidated with `reward = 0` and `resolved_at = at`.
    async fn resolve_liquidation(&self, id: TradeId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Resolved trades whose building is still `active`.
    ///
    /// Only a building's latest trade counts, so a building already
    /// reserved by a newer trade is never reported. Lets the monitor
    /// finish building writes that a failed request or a crash left
    /// behind.
    async fn find_unsynced_resolutions(&self) -> StoreResult<Vec<Trade>>;

    /// Set a building's status only if it is currently `from`.
    async fn update_building_status(
        &self,
        id: BuildingId,
        from: BuildingStatus,
        to: BuildingStatus,
    ) -> StoreResult<bool>;
}

/// Live stream of trade changes (inserts and updates).
#[async_trait]
pub trait TradeFeed: Send + Sync {
    async fn subscribe(&self) -> StoreResult<TradeSubscription>;
}

/// Receiving half of a trade change subscription.
///
/// Dropping the subscription or calling [`unsubscribe`](Self::unsubscribe)
/// stops the producer.
#[derive(Debug)]
pub struct TradeSubscription {
    rx: mpsc::Receiver<Trade>,
    cancel: CancellationToken,
}

impl TradeSubscription {
    /// Wrap a receiver. The producer must stop once `cancel` fires.
    pub fn new(rx: mpsc::Receiver<Trade>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next change, `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<Trade> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TradeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Dungeon
// ============================================================================

#[async_trait]
pub trait DungeonStore: Send + Sync {
    async fn list_characters(&self) -> StoreResult<Vec<Character>>;

    async fn create_run(&self, run: &DungeonRun) -> StoreResult<()>;

    /// Most recently started run with no `finished_at`.
    async fn find_open_run(&self) -> StoreResult<Option<DungeonRun>>;

    /// Set `finished_at` if the run is still open.
    async fn finish_run(&self, id: RunId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Insert unless the character already has an open enrollment.
    async fn create_enrollment_if_absent(&self, enrollment: &CharacterDungeon)
        -> StoreResult<bool>;

    async fn find_enrollment(&self, id: EnrollmentId) -> StoreResult<Option<CharacterDungeon>>;

    async fn list_open_enrollments(&self, run_id: RunId) -> StoreResult<Vec<CharacterDungeon>>;

    /// Finished and unclaimed enrollments of one character.
    async fn list_claimable(&self, character_id: CharacterId)
        -> StoreResult<Vec<CharacterDungeon>>;

    /// Set `finished_at` on every open enrollment of the run. Returns the count.
    async fn finish_enrollments(&self, run_id: RunId, at: DateTime<Utc>) -> StoreResult<u64>;

    /// Append one event and add `damage`/`reward` to the enrollment totals,
    /// atomically. `false` if the enrollment is no longer open.
    async fn record_damage(
        &self,
        enrollment_id: EnrollmentId,
        damage: u64,
        reward: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Set `claimed_at = at` if the enrollment is finished, unclaimed and
    /// owned by `user_id`. Returns the claimed row.
    async fn claim_enrollment(
        &self,
        id: EnrollmentId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CharacterDungeon>>;

    /// Clear `claimed_at` if it still equals `claimed_at`.
    async fn release_claim(&self, id: EnrollmentId, claimed_at: DateTime<Utc>)
        -> StoreResult<bool>;

    async fn list_events(&self, enrollment_id: EnrollmentId) -> StoreResult<Vec<DungeonEvent>>;

    /// Delete every event of the enrollment. Returns the count.
    async fn purge_events(&self, enrollment_id: EnrollmentId) -> StoreResult<u64>;
}

// ============================================================================
// Balances
// ============================================================================

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Add `amount` tokens and return the new balance.
    async fn credit(&self, user_id: UserId, amount: u64) -> StoreResult<u64>;

    async fn balance(&self, user_id: UserId) -> StoreResult<u64>;
}
