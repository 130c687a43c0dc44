//! Dungeon cycle manager.
//!
//! Runs one global dungeon run after another with no idle gap:
//! create the run and enroll every eligible character, tick damage on a
//! fixed interval, and at the run's wall-clock deadline stop ticking, finish
//! the run's open enrollments and mark the run finished.
//!
//! The store's open run is the source of truth across restarts; see
//! [`RecoveryPolicy`]. Stopping cancels the current cycle without
//! finishing it.

use chrono::{DateTime, Utc};
use forge_core::{CharacterDungeon, DungeonRun};
use forge_store::DungeonStore;
use forge_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::damage::DamageRoll;
use crate::error::{DungeonError, DungeonResult};

/// What to do with an open run found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Continue it for the remaining time; finish it first if already overdue.
    #[default]
    Resume,
    /// Finish it immediately and start fresh.
    Abandon,
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub cycle_duration: Duration,
    pub tick_interval: Duration,
    pub reward_per_damage: Decimal,
    /// Wait before retrying a failed run creation or finalization.
    pub retry_backoff: Duration,
    pub recovery: RecoveryPolicy,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_duration: Duration::from_secs(3600),
            tick_interval: Duration::from_secs(5),
            reward_per_damage: Decimal::new(1, 1),
            retry_backoff: Duration::from_secs(5),
            recovery: RecoveryPolicy::Resume,
        }
    }
}

impl CycleConfig {
    pub fn validate(&self) -> DungeonResult<()> {
        if self.cycle_duration.as_secs() == 0 {
            return Err(DungeonError::InvalidConfig(
                "cycle_duration must be at least one second".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(DungeonError::InvalidConfig(
                "tick_interval must be positive".to_string(),
            ));
        }
        if self.reward_per_damage.is_sign_negative() {
            return Err(DungeonError::InvalidConfig(format!(
                "reward_per_damage must not be negative, got {}",
                self.reward_per_damage
            )));
        }
        Ok(())
    }
}

/// How a driven run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// The deadline passed; the run is ready to be finished.
    Deadline,
    /// Shutdown was requested; the run stays open.
    Cancelled,
}

/// Result of one tick over a run's open enrollments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub ticked: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct DungeonCycleManager {
    config: CycleConfig,
    store: Arc<dyn DungeonStore>,
    roll: DamageRoll,
}

impl DungeonCycleManager {
    pub fn new(config: CycleConfig, store: Arc<dyn DungeonStore>) -> DungeonResult<Self> {
        let roll = DamageRoll::new(config.reward_per_damage);
        Self::with_roll(config, store, roll)
    }

    /// Use a caller-supplied damage roll (seeded in tests).
    pub fn with_roll(
        config: CycleConfig,
        store: Arc<dyn DungeonStore>,
        roll: DamageRoll,
    ) -> DungeonResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            roll,
        })
    }

    /// Run cycles until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            cycle_secs = self.config.cycle_duration.as_secs(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            reward_per_damage = %self.config.reward_per_damage,
            recovery = ?self.config.recovery,
            "DungeonCycleManager started"
        );

        let mut current = self.recover_with_retry(&shutdown).await;

        while !shutdown.is_cancelled() {
            let run = match current.take() {
                Some(run) => run,
                None => match self.start_cycle(Utc::now()).await {
                    Ok(run) => run,
                    Err(e) => {
                        warn!(
                            error = %e,
                            backoff_ms = self.config.retry_backoff.as_millis() as u64,
                            "Failed to start dungeon run, retrying"
                        );
                        if !self.backoff(&shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            if self.drive(&run, &shutdown).await == CycleEnd::Cancelled {
                break;
            }
            if !self.finalize_with_retry(&run, &shutdown).await {
                break;
            }
        }

        info!("DungeonCycleManager stopped");
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    /// Apply the recovery policy to the store's open run, if any.
    ///
    /// Returns the run to continue, or `None` when a fresh run is needed.
    pub async fn recover(&self, now: DateTime<Utc>) -> DungeonResult<Option<DungeonRun>> {
        let Some(run) = self.store.find_open_run().await? else {
            debug!("No open dungeon run, starting fresh");
            return Ok(None);
        };

        let overdue = run.deadline() <= now;
        match self.config.recovery {
            RecoveryPolicy::Resume if !overdue => {
                info!(
                    run_id = %run.id,
                    started_at = %run.started_at,
                    remaining_secs = run.remaining(now).as_secs(),
                    "Resuming open dungeon run"
                );
                // Enrollment may have been cut short by the crash.
                self.enroll(&run, now).await?;
                Ok(Some(run))
            }
            policy => {
                info!(run_id = %run.id, ?policy, overdue, "Finishing open dungeon run before starting fresh");
                self.finalize(&run, now).await?;
                Ok(None)
            }
        }
    }

    async fn recover_with_retry(&self, shutdown: &CancellationToken) -> Option<DungeonRun> {
        loop {
            match self.recover(Utc::now()).await {
                Ok(run) => return run,
                Err(e) => {
                    warn!(error = %e, "Dungeon recovery failed, retrying");
                    if !self.backoff(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Starting
    // ------------------------------------------------------------------------

    /// Create a run starting at `now` and enroll every eligible character.
    pub async fn start_cycle(&self, now: DateTime<Utc>) -> DungeonResult<DungeonRun> {
        let run = DungeonRun::start(now, self.config.cycle_duration.as_secs());
        self.store.create_run(&run).await?;
        let enrolled = match self.enroll(&run, now).await {
            Ok(enrolled) => enrolled,
            Err(e) => {
                // The run exists; ticks will pick up whoever did get enrolled.
                warn!(run_id = %run.id, error = %e, "Enrollment failed for new run");
                0
            }
        };
        info!(run_id = %run.id, deadline = %run.deadline(), enrolled, "Dungeon run started");
        Ok(run)
    }

    /// Enroll eligible characters into `run`. Characters that already have
    /// an open enrollment are skipped. Returns how many were enrolled.
    pub async fn enroll(&self, run: &DungeonRun, now: DateTime<Utc>) -> DungeonResult<u64> {
        let characters = self.store.list_characters().await?;
        let mut enrolled = 0u64;
        let mut skipped = 0u64;

        for character in characters.iter().filter(|c| c.is_eligible()) {
            let enrollment = CharacterDungeon::enroll(character, run, now);
            match self.store.create_enrollment_if_absent(&enrollment).await {
                Ok(true) => enrolled += 1,
                Ok(false) => skipped += 1,
                Err(e) => {
                    warn!(character_id = %character.id, run_id = %run.id, error = %e, "Failed to enroll character");
                }
            }
        }

        debug!(run_id = %run.id, enrolled, skipped, "Enrollment pass complete");
        Metrics::dungeon_enrolled(enrolled);
        Ok(enrolled)
    }

    // ------------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------------

    /// Tick `run` until its deadline or until `shutdown`.
    ///
    /// The ticker is dropped before this returns, so no tick can overlap
    /// finalization.
    pub async fn drive(&self, run: &DungeonRun, shutdown: &CancellationToken) -> CycleEnd {
        let deadline = Instant::now() + run.remaining(Utc::now());
        let end = tokio::time::sleep_until(deadline);
        tokio::pin!(end);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; damage starts one interval in.
        ticker.reset();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => return CycleEnd::Cancelled,

                () = &mut end => return CycleEnd::Deadline,

                _ = ticker.tick() => {
                    self.tick(run, shutdown).await;
                }
            }
        }
    }

    /// Apply one damage tick to every open enrollment of `run`.
    ///
    /// A failed enrollment does not stop the others.
    pub async fn tick(&self, run: &DungeonRun, shutdown: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();

        let enrollments = match self.store.list_open_enrollments(run.id).await {
            Ok(enrollments) => enrollments,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Failed to list open enrollments, skipping tick");
                Metrics::dungeon_tick_failure();
                return report;
            }
        };

        for enrollment in &enrollments {
            if shutdown.is_cancelled() {
                break;
            }
            let (damage, reward) = self.roll.hit(enrollment);
            match self
                .store
                .record_damage(enrollment.id, damage, reward, Utc::now())
                .await
            {
                Ok(true) => report.ticked += 1,
                Ok(false) => {
                    debug!(enrollment_id = %enrollment.id, "Enrollment no longer open, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(enrollment_id = %enrollment.id, damage, error = %e, "Failed to record damage");
                    Metrics::dungeon_tick_failure();
                    report.failed += 1;
                }
            }
        }

        Metrics::dungeon_tick();
        debug!(run_id = %run.id, ticked = report.ticked, failed = report.failed, "Tick complete");
        report
    }

    // ------------------------------------------------------------------------
    // Finishing
    // ------------------------------------------------------------------------

    /// Finish the run's open enrollments, then the run itself.
    pub async fn finalize(&self, run: &DungeonRun, now: DateTime<Utc>) -> DungeonResult<()> {
        let finished = self.store.finish_enrollments(run.id, now).await?;
        let closed = self.store.finish_run(run.id, now).await?;
        if closed {
            Metrics::dungeon_cycle_finished();
        }
        info!(run_id = %run.id, enrollments = finished, closed, "Dungeon run finished");
        Ok(())
    }

    async fn finalize_with_retry(&self, run: &DungeonRun, shutdown: &CancellationToken) -> bool {
        loop {
            match self.finalize(run, Utc::now()).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Failed to finish dungeon run, retrying");
                    if !self.backoff(shutdown).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep for the retry backoff. `false` if shutdown came first.
    async fn backoff(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = shutdown.cancelled() => false,
            () = tokio::time::sleep(self.config.retry_backoff) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forge_core::{
        Character, CharacterId, DungeonEvent, EnrollmentId, RunId, UserId,
    };
    use forge_store::{MemoryStore, StoreError, StoreResult};
    use mockall::mock;
    use rust_decimal_macros::dec;

    mock! {
        pub Store {}

        #[async_trait]
        impl DungeonStore for Store {
            async fn list_characters(&self) -> StoreResult<Vec<Character>>;
            async fn create_run(&self, run: &DungeonRun) -> StoreResult<()>;
            async fn find_open_run(&self) -> StoreResult<Option<DungeonRun>>;
            async fn finish_run(&self, id: RunId, at: DateTime<Utc>) -> StoreResult<bool>;
            async fn create_enrollment_if_absent(
                &self,
                enrollment: &CharacterDungeon,
            ) -> StoreResult<bool>;
            async fn find_enrollment(&self, id: EnrollmentId) -> StoreResult<Option<CharacterDungeon>>;
            async fn list_open_enrollments(&self, run_id: RunId) -> StoreResult<Vec<CharacterDungeon>>;
            async fn list_claimable(
                &self,
                character_id: CharacterId,
            ) -> StoreResult<Vec<CharacterDungeon>>;
            async fn finish_enrollments(&self, run_id: RunId, at: DateTime<Utc>) -> StoreResult<u64>;
            async fn record_damage(
                &self,
                enrollment_id: EnrollmentId,
                damage: u64,
                reward: u64,
                at: DateTime<Utc>,
            ) -> StoreResult<bool>;
            async fn claim_enrollment(
                &self,
                id: EnrollmentId,
                user_id: UserId,
                at: DateTime<Utc>,
            ) -> StoreResult<Option<CharacterDungeon>>;
            async fn release_claim(
                &self,
                id: EnrollmentId,
                claimed_at: DateTime<Utc>,
            ) -> StoreResult<bool>;
            async fn list_events(&self, enrollment_id: EnrollmentId) -> StoreResult<Vec<DungeonEvent>>;
            async fn purge_events(&self, enrollment_id: EnrollmentId) -> StoreResult<u64>;
        }
    }

    fn config(recovery: RecoveryPolicy) -> CycleConfig {
        CycleConfig {
            cycle_duration: Duration::from_secs(60),
            tick_interval: Duration::from_secs(5),
            reward_per_damage: dec!(0.1),
            retry_backoff: Duration::from_secs(5),
            recovery,
        }
    }

    fn manager(store: Arc<dyn DungeonStore>, recovery: RecoveryPolicy) -> DungeonCycleManager {
        DungeonCycleManager::with_roll(
            config(recovery),
            store,
            DamageRoll::with_seed(dec!(0.1), 7),
        )
        .unwrap()
    }

    fn character(store: &MemoryStore, rating: u32) -> Character {
        let character = Character {
            id: CharacterId::new(),
            user_id: UserId::new(),
            damage_rating: rating,
        };
        store.insert_character(character.clone());
        character
    }

    #[test]
    fn test_config_validation() {
        assert!(CycleConfig::default().validate().is_ok());

        let mut bad = CycleConfig::default();
        bad.tick_interval = Duration::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = CycleConfig::default();
        bad.reward_per_damage = dec!(-1);
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_start_cycle_enrolls_only_eligible() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        character(&store, 10);
        character(&store, 0);
        let m = manager(store.clone(), RecoveryPolicy::Resume);

        let run = m.start_cycle(Utc::now()).await.unwrap();

        assert_eq!(store.runs().len(), 1);
        let enrolled = store.enrollments_of_run(run.id);
        assert_eq!(enrolled.len(), 2);
        assert!(enrolled.iter().all(|e| e.starting_damage_rating > 0));
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent_per_character() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Resume);

        let run = m.start_cycle(Utc::now()).await.unwrap();
        assert_eq!(m.enroll(&run, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.enrollments_of_run(run.id).len(), 1);
    }

    #[tokio::test]
    async fn test_tick_records_damage_within_range() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now()).await.unwrap();

        let report = m.tick(&run, &CancellationToken::new()).await;
        assert_eq!(report, TickReport { ticked: 1, skipped: 0, failed: 0 });

        let enrollment = store.enrollments_of_run(run.id).remove(0);
        assert!((45..=55).contains(&enrollment.total_damage));
        let expected_reward = DamageRoll::with_seed(dec!(0.1), 0).reward(enrollment.total_damage);
        assert_eq!(enrollment.total_reward, expected_reward);

        let events = store.list_events(enrollment.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].damage, enrollment.total_damage);
    }

    #[tokio::test]
    async fn test_reward_tracks_cumulative_damage() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 3);
        character(&store, 27);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now()).await.unwrap();

        let shutdown = CancellationToken::new();
        for _ in 0..200 {
            m.tick(&run, &shutdown).await;
        }

        let ratio = DamageRoll::with_seed(dec!(0.1), 0);
        for enrollment in store.enrollments_of_run(run.id) {
            assert_eq!(enrollment.total_reward, ratio.reward(enrollment.total_damage));
            assert!(enrollment.total_reward > 0);
        }
    }

    #[tokio::test]
    async fn test_rating_change_does_not_affect_open_enrollment() {
        let store = Arc::new(MemoryStore::new());
        let mut c = character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now()).await.unwrap();

        c.damage_rating = 5000;
        store.insert_character(c);
        m.tick(&run, &CancellationToken::new()).await;

        let enrollment = store.enrollments_of_run(run.id).remove(0);
        assert_eq!(enrollment.starting_damage_rating, 50);
        assert!(enrollment.total_damage <= 55);
    }

    #[tokio::test]
    async fn test_tick_failure_is_isolated_per_enrollment() {
        let run = DungeonRun::start(Utc::now(), 60);
        let a = CharacterDungeon::enroll(
            &Character { id: CharacterId::new(), user_id: UserId::new(), damage_rating: 10 },
            &run,
            Utc::now(),
        );
        let b = CharacterDungeon::enroll(
            &Character { id: CharacterId::new(), user_id: UserId::new(), damage_rating: 20 },
            &run,
            Utc::now(),
        );
        let failing = a.id;

        let mut store = MockStore::new();
        let listed = vec![a, b];
        store
            .expect_list_open_enrollments()
            .returning(move |_| Ok(listed.clone()));
        store
            .expect_record_damage()
            .times(2)
            .returning(move |id, _, _, _| {
                if id == failing {
                    Err(StoreError::Unavailable("timeout".to_string()))
                } else {
                    Ok(true)
                }
            });
        let m = manager(Arc::new(store), RecoveryPolicy::Resume);

        let report = m.tick(&run, &CancellationToken::new()).await;
        assert_eq!(report, TickReport { ticked: 1, skipped: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_finalize_finishes_enrollments_then_run() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        character(&store, 30);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now()).await.unwrap();

        m.finalize(&run, Utc::now()).await.unwrap();

        assert!(store.runs().iter().all(|r| !r.is_open()));
        assert!(store.enrollments_of_run(run.id).iter().all(|e| e.is_claimable()));
        // Late tick writes nothing.
        let report = m.tick(&run, &CancellationToken::new()).await;
        assert_eq!(report.ticked, 0);
    }

    #[tokio::test]
    async fn test_resume_recovery_continues_open_run() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now() - chrono::Duration::seconds(10)).await.unwrap();
        // A character created while the worker was down.
        character(&store, 20);

        let resumed = m.recover(Utc::now()).await.unwrap();

        assert_eq!(resumed.map(|r| r.id), Some(run.id));
        assert!(store.runs()[0].is_open());
        assert_eq!(store.enrollments_of_run(run.id).len(), 2);
    }

    #[tokio::test]
    async fn test_resume_recovery_finishes_overdue_run() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Resume);
        let run = m.start_cycle(Utc::now() - chrono::Duration::seconds(120)).await.unwrap();

        assert!(m.recover(Utc::now()).await.unwrap().is_none());
        assert!(!store.runs()[0].is_open());
        assert!(store.enrollments_of_run(run.id).iter().all(|e| !e.is_open()));
    }

    #[tokio::test]
    async fn test_abandon_recovery_finishes_open_run() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = manager(store.clone(), RecoveryPolicy::Abandon);
        let run = m.start_cycle(Utc::now()).await.unwrap();

        assert!(m.recover(Utc::now()).await.unwrap().is_none());
        assert!(!store.runs()[0].is_open());
        assert!(store.enrollments_of_run(run.id).iter().all(|e| e.is_claimable()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_follow_each_other() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = Arc::new(manager(store.clone(), RecoveryPolicy::Resume));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let m = m.clone();
            let shutdown = shutdown.clone();
            async move { m.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(90)).await;
        shutdown.cancel();
        task.await.unwrap();

        let runs = store.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs.iter().filter(|r| r.is_open()).count(), 1);

        let first = runs.iter().find(|r| !r.is_open()).unwrap();
        let enrollment = store.enrollments_of_run(first.id).remove(0);
        assert!(enrollment.is_claimable());
        // Ticks at 5s..55s, none after the deadline.
        let events = store.list_events(enrollment.id).await.unwrap();
        assert!((11..=12).contains(&events.len()), "{} ticks", events.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_run_open() {
        let store = Arc::new(MemoryStore::new());
        character(&store, 50);
        let m = Arc::new(manager(store.clone(), RecoveryPolicy::Resume));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let m = m.clone();
            let shutdown = shutdown.clone();
            async move { m.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown.cancel();
        task.await.unwrap();

        let runs = store.runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].is_open());
        assert!(store.enrollments_of_run(runs[0].id)[0].is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_creation_failure_is_retried() {
        let mut store = MockStore::new();
        let mut seq = mockall::Sequence::new();
        store.expect_find_open_run().returning(|| Ok(None));
        store
            .expect_create_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));
        store
            .expect_create_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        store.expect_list_characters().returning(|| Ok(Vec::new()));
        store.expect_list_open_enrollments().returning(|_| Ok(Vec::new()));
        let m = Arc::new(manager(Arc::new(store), RecoveryPolicy::Resume));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let m = m.clone();
            let shutdown = shutdown.clone();
            async move { m.run(shutdown).await }
        });

        // Backoff is 5s; the second attempt lands before 7s.
        tokio::time::sleep(Duration::from_secs(7)).await;
        shutdown.cancel();
        task.await.unwrap();
    }
}
