//! In-process store backend.
//!
//! Holds every table in memory and honours the same guarded-update
//! semantics as the PostgREST backend. Trade writes are broadcast to
//! subscribers so the monitor's push path can be exercised without a
//! Realtime server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use forge_core::{
    Building, BuildingId, BuildingStatus, Character, CharacterDungeon, CharacterId, ClaimState,
    DungeonEvent, DungeonRun, EnrollmentId, RunId, Trade, TradeId, TradeStatus, UserId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::repository::{BalanceStore, DungeonStore, TradeFeed, TradeStore, TradeSubscription};

/// Capacity of the trade change broadcast.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Buffer of each subscriber's forwarding channel.
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct DungeonTables {
    characters: Vec<Character>,
    runs: Vec<DungeonRun>,
    enrollments: HashMap<EnrollmentId, CharacterDungeon>,
    events: Vec<DungeonEvent>,
}

/// In-memory implementation of every repository trait.
pub struct MemoryStore {
    trades: DashMap<TradeId, Trade>,
    buildings: DashMap<BuildingId, Building>,
    dungeon: Mutex<DungeonTables>,
    balances: DashMap<UserId, u64>,
    changes: broadcast::Sender<Trade>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            trades: DashMap::new(),
            buildings: DashMap::new(),
            dungeon: Mutex::new(DungeonTables::default()),
            balances: DashMap::new(),
            changes,
        }
    }

    // ------------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------------

    /// Insert or replace a trade and notify subscribers.
    pub fn insert_trade(&self, trade: Trade) {
        self.trades.insert(trade.id, trade.clone());
        self.notify(trade);
    }

    pub fn insert_building(&self, building: Building) {
        self.buildings.insert(building.id, building);
    }

    pub fn insert_character(&self, character: Character) {
        let mut tables = self.dungeon.lock();
        tables.characters.retain(|c| c.id != character.id);
        tables.characters.push(character);
    }

    pub fn trade(&self, id: TradeId) -> Option<Trade> {
        self.trades.get(&id).map(|t| t.clone())
    }

    pub fn building(&self, id: BuildingId) -> Option<Building> {
        self.buildings.get(&id).map(|b| b.clone())
    }

    /// Every run ever created, oldest first.
    pub fn runs(&self) -> Vec<DungeonRun> {
        let mut runs = self.dungeon.lock().runs.clone();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    /// Every enrollment of a run, open or not.
    pub fn enrollments_of_run(&self, run_id: RunId) -> Vec<CharacterDungeon> {
        self.dungeon
            .lock()
            .enrollments
            .values()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    fn notify(&self, trade: Trade) {
        // No receivers is fine.
        let _ = self.changes.send(trade);
    }

    /// Apply `f` to a trade if its status is `from`, then broadcast it.
    fn guarded_trade_update(
        &self,
        id: TradeId,
        from: TradeStatus,
        f: impl FnOnce(&mut Trade),
    ) -> bool {
        let updated = match self.trades.get_mut(&id) {
            Some(mut trade) if trade.status == from => {
                f(&mut trade);
                Some(trade.clone())
            }
            _ => None,
        };
        match updated {
            Some(trade) => {
                self.notify(trade);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TradeStore / TradeFeed
// ============================================================================

#[async_trait]
impl TradeStore for MemoryStore {
    async fn find_active_trades(&self) -> StoreResult<Vec<Trade>> {
        self.find_trades_by_status(TradeStatus::Active).await
    }

    async fn find_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect();
        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    async fn find_by_id(&self, id: TradeId) -> StoreResult<Option<Trade>> {
        Ok(self.trade(id))
    }

    async fn update_status(
        &self,
        id: TradeId,
        from: TradeStatus,
        to: TradeStatus,
    ) -> StoreResult<bool> {
        let to = from.transition(to)?;
        Ok(self.guarded_trade_update(id, from, |t| t.status = to))
    }

    async fn resolve_completion(
        &self,
        id: TradeId,
        reward: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(self.guarded_trade_update(id, TradeStatus::Active, |t| {
            t.status = TradeStatus::Completed;
            t.reward = Some(reward);
            t.resolved_at = Some(at);
            t.claim_state = ClaimState::Unclaimed;
        }))
    }

    async fn resolve_liquidation(&self, id: TradeId, at: DateTime<Utc>) -> StoreResult<bool> {
        Ok(self.guarded_trade_update(id, TradeStatus::Active, |t| {
            t.status = TradeStatus::Liquidated;
            t.reward = Some(0);
            t.resolved_at = Some(at);
            t.claim_state = ClaimState::NotApplicable;
        }))
    }

    async fn find_unsynced_resolutions(&self) -> StoreResult<Vec<Trade>> {
        let mut latest: HashMap<BuildingId, Trade> = HashMap::new();
        for trade in self.trades.iter() {
            match latest.get(&trade.building_id) {
                Some(newer) if newer.created_at >= trade.created_at => {}
                _ => {
                    latest.insert(trade.building_id, trade.clone());
                }
            }
        }

        let mut unsynced: Vec<Trade> = latest
            .into_values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| {
                self.buildings
                    .get(&t.building_id)
                    .is_some_and(|b| b.status == BuildingStatus::Active)
            })
            .collect();
        unsynced.sort_by_key(|t| t.created_at);
        Ok(unsynced)
    }

    async fn update_building_status(
        &self,
        id: BuildingId,
        from: BuildingStatus,
        to: BuildingStatus,
    ) -> StoreResult<bool> {
        let to = from.transition(to)?;
        match self.buildings.get_mut(&id) {
            Some(mut building) if building.status == from => {
                building.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TradeFeed for MemoryStore {
    async fn subscribe(&self) -> StoreResult<TradeSubscription> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(trade) => {
                            if tx.send(trade).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Trade subscriber lagged, changes dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Memory trade subscription closed");
        });

        Ok(TradeSubscription::new(rx, cancel))
    }
}

// ============================================================================
// DungeonStore
// ============================================================================

#[async_trait]
impl DungeonStore for MemoryStore {
    async fn list_characters(&self) -> StoreResult<Vec<Character>> {
        Ok(self.dungeon.lock().characters.clone())
    }

    async fn create_run(&self, run: &DungeonRun) -> StoreResult<()> {
        let mut tables = self.dungeon.lock();
        if tables.runs.iter().any(|r| r.id == run.id) {
            return Err(StoreError::Status {
                status: 409,
                body: format!("run {} already exists", run.id),
            });
        }
        tables.runs.push(run.clone());
        Ok(())
    }

    async fn find_open_run(&self) -> StoreResult<Option<DungeonRun>> {
        Ok(self
            .dungeon
            .lock()
            .runs
            .iter()
            .filter(|r| r.is_open())
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn finish_run(&self, id: RunId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.dungeon.lock();
        match tables.runs.iter_mut().find(|r| r.id == id && r.is_open()) {
            Some(run) => {
                run.finished_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_enrollment_if_absent(
        &self,
        enrollment: &CharacterDungeon,
    ) -> StoreResult<bool> {
        let mut tables = self.dungeon.lock();
        let has_open = tables
            .enrollments
            .values()
            .any(|e| e.character_id == enrollment.character_id && e.is_open());
        if has_open {
            return Ok(false);
        }
        tables
            .enrollments
            .insert(enrollment.id, enrollment.clone());
        Ok(true)
    }

    async fn find_enrollment(&self, id: EnrollmentId) -> StoreResult<Option<CharacterDungeon>> {
        Ok(self.dungeon.lock().enrollments.get(&id).cloned())
    }

    async fn list_open_enrollments(&self, run_id: RunId) -> StoreResult<Vec<CharacterDungeon>> {
        let mut open: Vec<CharacterDungeon> = self
            .dungeon
            .lock()
            .enrollments
            .values()
            .filter(|e| e.run_id == run_id && e.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|e| e.joined_at);
        Ok(open)
    }

    async fn list_claimable(
        &self,
        character_id: CharacterId,
    ) -> StoreResult<Vec<CharacterDungeon>> {
        let mut claimable: Vec<CharacterDungeon> = self
            .dungeon
            .lock()
            .enrollments
            .values()
            .filter(|e| e.character_id == character_id && e.is_claimable())
            .cloned()
            .collect();
        claimable.sort_by_key(|e| e.joined_at);
        Ok(claimable)
    }

    async fn finish_enrollments(&self, run_id: RunId, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.dungeon.lock();
        let mut finished = 0;
        for enrollment in tables.enrollments.values_mut() {
            if enrollment.run_id == run_id && enrollment.is_open() {
                enrollment.finished_at = Some(at);
                finished += 1;
            }
        }
        Ok(finished)
    }

    async fn record_damage(
        &self,
        enrollment_id: EnrollmentId,
        damage: u64,
        reward: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.dungeon.lock();
        match tables.enrollments.get_mut(&enrollment_id) {
            Some(enrollment) if enrollment.is_open() => {
                enrollment.total_damage = enrollment.total_damage.saturating_add(damage);
                enrollment.total_reward = enrollment.total_reward.saturating_add(reward);
            }
            _ => return Ok(false),
        }
        tables
            .events
            .push(DungeonEvent::new(enrollment_id, damage, at));
        Ok(true)
    }

    async fn claim_enrollment(
        &self,
        id: EnrollmentId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CharacterDungeon>> {
        let mut tables = self.dungeon.lock();
        match tables.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.user_id == user_id && enrollment.is_claimable() => {
                enrollment.claimed_at = Some(at);
                Ok(Some(enrollment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_claim(
        &self,
        id: EnrollmentId,
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.dungeon.lock();
        match tables.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.claimed_at == Some(claimed_at) => {
                enrollment.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_events(&self, enrollment_id: EnrollmentId) -> StoreResult<Vec<DungeonEvent>> {
        Ok(self
            .dungeon
            .lock()
            .events
            .iter()
            .filter(|e| e.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }

    async fn purge_events(&self, enrollment_id: EnrollmentId) -> StoreResult<u64> {
        let mut tables = self.dungeon.lock();
        let before = tables.events.len();
        tables.events.retain(|e| e.enrollment_id != enrollment_id);
        Ok((before - tables.events.len()) as u64)
    }
}

// ============================================================================
// BalanceStore
// ============================================================================

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn credit(&self, user_id: UserId, amount: u64) -> StoreResult<u64> {
        let mut entry = self.balances.entry(user_id).or_insert(0);
        let updated = entry.saturating_add(amount);
        *entry = updated;
        Ok(updated)
    }

    async fn balance(&self, user_id: UserId) -> StoreResult<u64> {
        Ok(self.balances.get(&user_id).map(|b| *b).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{Price, RiskTable, RiskTier};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn active_trade(store: &MemoryStore) -> Trade {
        let building = Building::new(1, UserId::new());
        let table = RiskTable::default();
        let mut trade = Trade::open(
            building.id,
            building.owner,
            "ETH",
            RiskTier::High,
            table.get(RiskTier::High),
            10,
            Price::new(dec!(3000)),
            Utc::now(),
        )
        .unwrap();
        trade.status = TradeStatus::Active;
        let mut building = building;
        building.status = BuildingStatus::Active;
        store.insert_building(building);
        store.insert_trade(trade.clone());
        trade
    }

    fn finished_enrollment(store: &MemoryStore, reward: u64) -> CharacterDungeon {
        let character = Character {
            id: CharacterId::new(),
            user_id: UserId::new(),
            damage_rating: 100,
        };
        let run = DungeonRun::start(Utc::now(), 60);
        let mut enrollment = CharacterDungeon::enroll(&character, &run, Utc::now());
        enrollment.total_reward = reward;
        enrollment.finished_at = Some(Utc::now());
        store
            .dungeon
            .lock()
            .enrollments
            .insert(enrollment.id, enrollment.clone());
        enrollment
    }

    #[tokio::test]
    async fn test_resolve_completion_is_guarded() {
        let store = MemoryStore::new();
        let trade = active_trade(&store);

        assert!(store
            .resolve_completion(trade.id, 200, Utc::now())
            .await
            .unwrap());
        // Second resolution attempts are rejected by the guard.
        assert!(!store
            .resolve_completion(trade.id, 200, Utc::now())
            .await
            .unwrap());
        assert!(!store.resolve_liquidation(trade.id, Utc::now()).await.unwrap());

        let stored = store.trade(trade.id).unwrap();
        assert_eq!(stored.status, TradeStatus::Completed);
        assert_eq!(stored.reward, Some(200));
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_liquidation_sets_zero_reward() {
        let store = MemoryStore::new();
        let trade = active_trade(&store);

        assert!(store.resolve_liquidation(trade.id, Utc::now()).await.unwrap());
        let stored = store.trade(trade.id).unwrap();
        assert_eq!(stored.status, TradeStatus::Liquidated);
        assert_eq!(stored.reward, Some(0));
        assert_eq!(stored.claim_state, ClaimState::NotApplicable);
    }

    #[tokio::test]
    async fn test_find_active_filters_by_status() {
        let store = MemoryStore::new();
        let a = active_trade(&store);
        let b = active_trade(&store);
        store.resolve_liquidation(b.id, Utc::now()).await.unwrap();

        let active = store.find_active_trades().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn test_building_update_is_guarded() {
        let store = MemoryStore::new();
        let trade = active_trade(&store);

        assert!(store
            .update_building_status(
                trade.building_id,
                BuildingStatus::Active,
                BuildingStatus::Completed
            )
            .await
            .unwrap());
        assert!(!store
            .update_building_status(
                trade.building_id,
                BuildingStatus::Active,
                BuildingStatus::Liquidated
            )
            .await
            .unwrap());
        assert_eq!(
            store.building(trade.building_id).unwrap().status,
            BuildingStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_terminal_trade_cannot_move_back() {
        let store = MemoryStore::new();
        let trade = active_trade(&store);
        store
            .resolve_completion(trade.id, 100, Utc::now())
            .await
            .unwrap();

        let result = store
            .update_status(trade.id, TradeStatus::Completed, TradeStatus::Active)
            .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        let result = store
            .update_status(trade.id, TradeStatus::Pending, TradeStatus::Completed)
            .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));

        assert_eq!(store.trade(trade.id).unwrap().status, TradeStatus::Completed);
    }

    #[tokio::test]
    async fn test_illegal_building_transition_is_rejected() {
        let store = MemoryStore::new();
        let trade = active_trade(&store);

        let result = store
            .update_building_status(trade.building_id, BuildingStatus::Active, BuildingStatus::Idle)
            .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(
            store.building(trade.building_id).unwrap().status,
            BuildingStatus::Active
        );
    }

    #[tokio::test]
    async fn test_unsynced_resolutions_track_lagging_buildings() {
        let store = MemoryStore::new();
        let resolved = active_trade(&store);
        let _open = active_trade(&store);
        store
            .resolve_liquidation(resolved.id, Utc::now())
            .await
            .unwrap();

        let unsynced = store.find_unsynced_resolutions().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, resolved.id);
        assert_eq!(unsynced[0].status, TradeStatus::Liquidated);

        store
            .update_building_status(
                resolved.building_id,
                BuildingStatus::Active,
                BuildingStatus::Liquidated,
            )
            .await
            .unwrap();
        assert!(store.find_unsynced_resolutions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsynced_ignores_building_reserved_by_newer_trade() {
        let store = MemoryStore::new();
        let old = active_trade(&store);
        store
            .resolve_completion(old.id, 100, Utc::now())
            .await
            .unwrap();

        let table = RiskTable::default();
        let newer = Trade::open(
            old.building_id,
            old.user_id,
            "ETH",
            RiskTier::Low,
            table.get(RiskTier::Low),
            10,
            Price::new(dec!(3000)),
            Utc::now() + chrono::Duration::seconds(1),
        )
        .unwrap();
        store.insert_trade(newer);

        assert!(store.find_unsynced_resolutions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_receives_updates() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();
        let trade = active_trade(&store);

        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, trade.id);

        store.resolve_liquidation(trade.id, Utc::now()).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.status, TradeStatus::Liquidated);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_stream() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe().await.unwrap();
        sub.unsubscribe();

        let next = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_enrollment_is_unique_per_open_character() {
        let store = MemoryStore::new();
        let character = Character {
            id: CharacterId::new(),
            user_id: UserId::new(),
            damage_rating: 10,
        };
        let run = DungeonRun::start(Utc::now(), 60);
        store.create_run(&run).await.unwrap();

        let first = CharacterDungeon::enroll(&character, &run, Utc::now());
        let second = CharacterDungeon::enroll(&character, &run, Utc::now());
        assert!(store.create_enrollment_if_absent(&first).await.unwrap());
        assert!(!store.create_enrollment_if_absent(&second).await.unwrap());

        store.finish_enrollments(run.id, Utc::now()).await.unwrap();
        let next_run = DungeonRun::start(Utc::now(), 60);
        let third = CharacterDungeon::enroll(&character, &next_run, Utc::now());
        assert!(store.create_enrollment_if_absent(&third).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_damage_updates_totals_and_events() {
        let store = MemoryStore::new();
        let character = Character {
            id: CharacterId::new(),
            user_id: UserId::new(),
            damage_rating: 10,
        };
        let run = DungeonRun::start(Utc::now(), 60);
        let enrollment = CharacterDungeon::enroll(&character, &run, Utc::now());
        store.create_enrollment_if_absent(&enrollment).await.unwrap();

        assert!(store
            .record_damage(enrollment.id, 10, 1, Utc::now())
            .await
            .unwrap());
        assert!(store
            .record_damage(enrollment.id, 11, 1, Utc::now())
            .await
            .unwrap());

        let stored = store.find_enrollment(enrollment.id).await.unwrap().unwrap();
        assert_eq!(stored.total_damage, 21);
        assert_eq!(stored.total_reward, 2);
        assert_eq!(store.list_events(enrollment.id).await.unwrap().len(), 2);

        store.finish_enrollments(run.id, Utc::now()).await.unwrap();
        assert!(!store
            .record_damage(enrollment.id, 10, 1, Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_open_run_lookup_and_finish() {
        let store = MemoryStore::new();
        assert!(store.find_open_run().await.unwrap().is_none());

        let run = DungeonRun::start(Utc::now(), 60);
        store.create_run(&run).await.unwrap();
        assert!(store.create_run(&run).await.is_err());
        assert_eq!(store.find_open_run().await.unwrap().unwrap().id, run.id);

        assert!(store.finish_run(run.id, Utc::now()).await.unwrap());
        assert!(!store.finish_run(run.id, Utc::now()).await.unwrap());
        assert!(store.find_open_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_requires_owner_and_is_single_use() {
        let store = MemoryStore::new();
        let enrollment = finished_enrollment(&store, 40);

        assert!(store
            .claim_enrollment(enrollment.id, UserId::new(), Utc::now())
            .await
            .unwrap()
            .is_none());

        let at = Utc::now();
        let claimed = store
            .claim_enrollment(enrollment.id, enrollment.user_id, at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.claimed_at, Some(at));
        assert!(store
            .claim_enrollment(enrollment.id, enrollment.user_id, Utc::now())
            .await
            .unwrap()
            .is_none());

        assert!(store.release_claim(enrollment.id, at).await.unwrap());
        assert_eq!(
            store.list_claimable(enrollment.character_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_purge_events_only_touches_one_enrollment() {
        let store = MemoryStore::new();
        let a = finished_enrollment(&store, 0);
        let b = finished_enrollment(&store, 0);
        {
            let mut tables = store.dungeon.lock();
            tables.events.push(DungeonEvent::new(a.id, 5, Utc::now()));
            tables.events.push(DungeonEvent::new(a.id, 6, Utc::now()));
            tables.events.push(DungeonEvent::new(b.id, 7, Utc::now()));
        }

        assert_eq!(store.purge_events(a.id).await.unwrap(), 2);
        assert!(store.list_events(a.id).await.unwrap().is_empty());
        assert_eq!(store.list_events(b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_accumulates() {
        let store = MemoryStore::new();
        let user = UserId::new();
        assert_eq!(store.balance(user).await.unwrap(), 0);
        assert_eq!(store.credit(user, 30).await.unwrap(), 30);
        assert_eq!(store.credit(user, 12).await.unwrap(), 42);
        assert_eq!(store.balance(user).await.unwrap(), 42);
    }
}
