//! Dungeon worker.
//!
//! # Components
//!
//! - [`DungeonCycleManager`]: perpetual fixed-length runs with damage ticks
//! - [`DamageRoll`]: per-tick damage and reward arithmetic
//! - [`RewardSettlement`]: claim-time payout of finished enrollments
//!
//! # Cycle
//!
//! ```text
//! Starting (create run, enroll) ─► Running (tick every tick_interval) ─► Finishing ─┐
//!     ▲                                                                            │
//!     └────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cycle;
pub mod damage;
pub mod error;
pub mod settlement;

pub use cycle::{CycleConfig, CycleEnd, DungeonCycleManager, RecoveryPolicy, TickReport};
pub use damage::DamageRoll;
pub use error::{DungeonError, DungeonResult, SettlementError, SettlementResult};
pub use settlement::{ClaimReceipt, RewardSettlement};
