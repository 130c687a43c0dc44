//! Dungeon worker end-to-end flow on the in-memory store.
//!
//! Runs real (short) cycles through the application, then settles the
//! finished enrollment through a claim.

use forge_core::{Character, CharacterId, UserId};
use forge_dungeon::SettlementError;
use forge_engine::{AppConfig, AppError, Application, Stores};
use forge_store::{BalanceStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn short_cycles() -> AppConfig {
    let mut config = AppConfig::default();
    config.dungeon.cycle_duration_secs = 1;
    config.dungeon.tick_interval_ms = 100;
    config.dungeon.retry_backoff_ms = 100;
    config.telemetry.health_port = 0;
    config
}

#[tokio::test]
async fn test_cycle_then_claim() {
    let store = Arc::new(MemoryStore::new());
    let user_id = UserId::new();
    let character = Character {
        id: CharacterId::new(),
        user_id,
        damage_rating: 50,
    };
    store.insert_character(character.clone());

    let app = Application::with_stores(short_cycles(), Stores::memory(store.clone()));
    let shutdown = app.shutdown_token();

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        shutdown.cancel();
    };
    let (result, ()) = timeout(Duration::from_secs(5), async {
        tokio::join!(app.run_dungeon_worker(), stopper)
    })
    .await
    .expect("Worker should stop after shutdown");
    result.unwrap();

    let runs = store.runs();
    assert_eq!(runs.len(), 2, "First cycle finished, second started");
    assert!(!runs[0].is_open());
    assert!(runs[1].is_open(), "Stop leaves the current run open");

    let finished = store.enrollments_of_run(runs[0].id);
    assert_eq!(finished.len(), 1);
    let expected = finished[0].total_reward;
    assert!(expected > 0);

    let receipt = app.claim_all(character.id, user_id).await.unwrap();
    assert_eq!(receipt.enrollment_ids, vec![finished[0].id]);
    assert_eq!(receipt.reward, expected);
    assert_eq!(receipt.balance, expected);
    assert_eq!(store.balance(user_id).await.unwrap(), expected);

    // Paid once; the open run's enrollment is not claimable yet.
    let again = app.claim_all(character.id, user_id).await;
    assert!(matches!(
        again,
        Err(AppError::Settlement(SettlementError::NothingToClaim(_)))
    ));
}

#[tokio::test]
async fn test_claim_by_other_user_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let owner = UserId::new();
    let character = Character {
        id: CharacterId::new(),
        user_id: owner,
        damage_rating: 20,
    };
    store.insert_character(character.clone());

    let app = Application::with_stores(short_cycles(), Stores::memory(store.clone()));
    let shutdown = app.shutdown_token();
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(1300)).await;
        shutdown.cancel();
    };
    let (result, ()) = tokio::join!(app.run_dungeon_worker(), stopper);
    result.unwrap();

    let run = &store.runs()[0];
    let enrollment = store.enrollments_of_run(run.id)[0].clone();

    let stranger = UserId::new();
    let rejected = app.claim(enrollment.id, stranger).await;
    assert!(matches!(
        rejected,
        Err(AppError::Settlement(SettlementError::NotOwner(_)))
    ));

    let receipt = app.claim(enrollment.id, owner).await.unwrap();
    assert_eq!(receipt.reward, enrollment.total_reward);
    assert_eq!(store.balance(owner).await.unwrap(), enrollment.total_reward);
}
