//! Forge background resolution engine.
//!
//! Wires the workers to their collaborators and supervises them:
//! - Trade worker: push + poll monitor, resolver, coordinator
//! - Dungeon worker: cycle manager
//! - Manual claims through reward settlement
//! - `/health` and `/metrics` endpoint

pub mod app;
pub mod config;
pub mod error;
pub mod health;

pub use app::{Application, Stores};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
