//! Integration tests for forge-engine.
//!
//! These tests verify the interaction between components:
//! - Realtime push delivery into the trade monitor
//! - Dungeon cycles followed by a manual claim
//! - Health and metrics endpoint

pub mod common;
