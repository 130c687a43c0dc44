//! Repository interfaces and store backends for the forge engine.
//!
//! The store is the single source of truth and the only synchronization
//! point between worker replicas. Every mutation is a guarded update that
//! only applies when the row is still in the expected prior state, so
//! replaying an operation (push/poll double delivery, two replicas) is a
//! no-op rather than a double side effect.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process tables, used by tests and dry runs
//! - [`PostgrestStore`]: hosted Postgres behind a PostgREST endpoint

pub mod error;
pub mod memory;
pub mod postgrest;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgrest::{PostgrestConfig, PostgrestStore};
pub use repository::{BalanceStore, DungeonStore, TradeFeed, TradeStore, TradeSubscription};
