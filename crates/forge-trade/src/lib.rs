//! Trade worker.
//!
//! # Components
//!
//! - [`TradeResolver`]: pure decision (trade, price, now) → [`Resolution`]
//! - [`Coordinator`]: applies a resolution as guarded store writes
//! - [`TradeMonitor`]: push + poll driver feeding trades through both
//!
//! # Data Flow
//!
//! ```text
//! Realtime push ─┐
//!                ├─► TradeMonitor ─► PriceOracle ─► TradeResolver ─► Coordinator ─► TradeStore
//! Periodic poll ─┘
//! ```

pub mod coordinator;
pub mod error;
pub mod monitor;
pub mod resolver;

pub use coordinator::{ApplyOutcome, Coordinator};
pub use error::{TradeError, TradeResult};
pub use monitor::{MonitorConfig, MonitorState, TradeMonitor};
pub use resolver::{
    build_resolver, PriceResolver, RandomResolver, Resolution, ResolverKind, TradeResolver,
};
