//! Core domain types for the forge game-economy engine.
//!
//! This crate provides the types shared by both background workers:
//! - Identifier newtypes (`TradeId`, `EnrollmentId`, ...)
//! - `Price`: precision-safe asset price
//! - `Trade`, `Building` and their closed status enums
//! - Risk tier configuration (`RiskTier`, `RiskTable`)
//! - Dungeon records (`DungeonRun`, `CharacterDungeon`, `DungeonEvent`)

pub mod decimal;
pub mod dungeon;
pub mod error;
pub mod ids;
pub mod trade;

pub use decimal::Price;
pub use dungeon::{Character, CharacterDungeon, DungeonEvent, DungeonRun};
pub use error::{CoreError, Result};
pub use ids::{BuildingId, CharacterId, EnrollmentId, EventId, RunId, TradeId, UserId};
pub use trade::{
    Building, BuildingStatus, ClaimState, RiskTable, RiskTier, RiskTierSpec, Trade, TradeStatus,
};
