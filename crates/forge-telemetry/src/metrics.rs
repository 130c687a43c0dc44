//! Prometheus metrics for the forge engine.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! startup. These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    CounterVec, Encoder, Histogram, IntCounter, IntGauge, TextEncoder,
};

use crate::error::TelemetryResult;

/// Trades resolved. Labels: outcome (completed/liquidated/already_resolved)
pub static TRADES_RESOLVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "forge_trades_resolved_total",
        "Trades transitioned out of the active state",
        &["outcome"]
    )
    .unwrap()
});

/// Pending trades promoted to active by the monitor.
pub static TRADES_ACTIVATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "forge_trades_activated_total",
        "Orphaned pending trades promoted to active"
    )
    .unwrap()
});

/// Store failures seen by the trade engine. Labels: operation
pub static TRADE_STORE_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "forge_trade_store_failures_total",
        "Trade store operations that failed and will be retried",
        &["operation"]
    )
    .unwrap()
});

/// Building status writes waiting for retry.
pub static BUILDING_SYNC_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "forge_building_sync_pending",
        "Buildings still active behind a resolved trade after the last sweep"
    )
    .unwrap()
});

/// Trade ids currently tracked as in flight by the monitor.
pub static MONITOR_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "forge_monitor_in_flight",
        "Trade ids tracked as in flight by the monitor"
    )
    .unwrap()
});

/// Poll pass duration.
pub static MONITOR_POLL_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "forge_monitor_poll_duration_ms",
        "Duration of one trade monitor poll pass in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Trades delivered by the push path.
pub static MONITOR_PUSH_DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "forge_monitor_push_deliveries_total",
        "Active trade notifications received on the push path"
    )
    .unwrap()
});

/// Oracle answers that did not come from a fresh upstream fetch.
/// Labels: symbol, kind (stale/default)
pub static ORACLE_FALLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "forge_oracle_fallback_total",
        "Price lookups answered from a stale cache entry or default value",
        &["symbol", "kind"]
    )
    .unwrap()
});

/// Characters enrolled into dungeon runs.
pub static DUNGEON_ENROLLMENTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "forge_dungeon_enrollments_total",
        "Characters enrolled into dungeon runs"
    )
    .unwrap()
});

/// Damage events written.
pub static DUNGEON_TICKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "forge_dungeon_ticks_total",
        "Damage events recorded for dungeon enrollments"
    )
    .unwrap()
});

/// Damage events that failed to record.
pub static DUNGEON_TICK_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "forge_dungeon_tick_failures_total",
        "Damage events that failed to record"
    )
    .unwrap()
});

/// Dungeon runs finished.
pub static DUNGEON_CYCLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("forge_dungeon_cycles_total", "Dungeon runs finished").unwrap()
});

/// Reward claims. Labels: result (claimed/rejected/rolled_back)
pub static DUNGEON_CLAIMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "forge_dungeon_claims_total",
        "Dungeon reward claim attempts",
        &["result"]
    )
    .unwrap()
});

/// Metric recording facade.
pub struct Metrics;

impl Metrics {
    pub fn trade_resolved(outcome: &str) {
        TRADES_RESOLVED_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn trade_activated() {
        TRADES_ACTIVATED_TOTAL.inc();
    }

    pub fn trade_store_failure(operation: &str) {
        TRADE_STORE_FAILURES_TOTAL
            .with_label_values(&[operation])
            .inc();
    }

    pub fn building_sync_pending(count: usize) {
        BUILDING_SYNC_PENDING.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn monitor_in_flight(count: usize) {
        MONITOR_IN_FLIGHT.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn monitor_poll_duration(duration_ms: f64) {
        MONITOR_POLL_DURATION_MS.observe(duration_ms);
    }

    pub fn monitor_push_delivery() {
        MONITOR_PUSH_DELIVERIES_TOTAL.inc();
    }

    pub fn oracle_fallback(symbol: &str, kind: &str) {
        ORACLE_FALLBACK_TOTAL
            .with_label_values(&[symbol, kind])
            .inc();
    }

    pub fn dungeon_enrolled(count: u64) {
        DUNGEON_ENROLLMENTS_TOTAL.inc_by(count);
    }

    pub fn dungeon_tick() {
        DUNGEON_TICKS_TOTAL.inc();
    }

    pub fn dungeon_tick_failure() {
        DUNGEON_TICK_FAILURES_TOTAL.inc();
    }

    pub fn dungeon_cycle_finished() {
        DUNGEON_CYCLES_TOTAL.inc();
    }

    pub fn dungeon_claim(result: &str) {
        DUNGEON_CLAIMS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Render every registered metric in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
