//! Trade resolution strategies.
//!
//! A resolver only decides; it never writes. Two strategies share the
//! [`TradeResolver`] interface and are picked by configuration:
//!
//! - [`PriceResolver`]: liquidation on price, completion on deadline
//! - [`RandomResolver`]: coin flip at the deadline, for demo economies

use chrono::{DateTime, Utc};
use forge_core::{Price, RiskTable, Trade};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{TradeError, TradeResult};

/// Outcome of evaluating one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing to do yet.
    Active,
    Completed { reward: u64 },
    Liquidated,
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Metric/log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed { .. } => "completed",
            Self::Liquidated => "liquidated",
        }
    }
}

pub trait TradeResolver: Send + Sync {
    /// Whether [`resolve`](Self::resolve) reads the price. When false the
    /// monitor skips the oracle.
    fn needs_price(&self) -> bool {
        true
    }

    /// Decide the trade's fate at `now`. `price` is `None` when the oracle
    /// had nothing to offer.
    fn resolve(&self, trade: &Trade, price: Option<Price>, now: DateTime<Utc>) -> Resolution;
}

// ============================================================================
// PriceResolver
// ============================================================================

/// Liquidation wins over completion when both hold.
#[derive(Debug, Clone)]
pub struct PriceResolver {
    risk_table: RiskTable,
}

impl PriceResolver {
    pub fn new(risk_table: RiskTable) -> Self {
        Self { risk_table }
    }
}

impl TradeResolver for PriceResolver {
    fn resolve(&self, trade: &Trade, price: Option<Price>, now: DateTime<Utc>) -> Resolution {
        // Without a price neither liquidation nor a safe completion can be judged.
        let Some(price) = price else {
            return Resolution::Active;
        };

        if price <= trade.liquidation_price {
            Resolution::Liquidated
        } else if now >= trade.completion_deadline {
            Resolution::Completed {
                reward: self.risk_table.reward(trade.risk_tier),
            }
        } else {
            Resolution::Active
        }
    }
}

// ============================================================================
// RandomResolver
// ============================================================================

/// Ignores the price. At the deadline, liquidates with a fixed probability.
pub struct RandomResolver {
    risk_table: RiskTable,
    liquidation_probability: f64,
    rng: Mutex<StdRng>,
}

impl RandomResolver {
    pub fn new(risk_table: RiskTable, liquidation_probability: f64) -> TradeResult<Self> {
        Self::with_rng(
            risk_table,
            liquidation_probability,
            StdRng::from_entropy(),
        )
    }

    /// Deterministic sequence for tests and replays.
    pub fn with_seed(
        risk_table: RiskTable,
        liquidation_probability: f64,
        seed: u64,
    ) -> TradeResult<Self> {
        Self::with_rng(
            risk_table,
            liquidation_probability,
            StdRng::seed_from_u64(seed),
        )
    }

    fn with_rng(
        risk_table: RiskTable,
        liquidation_probability: f64,
        rng: StdRng,
    ) -> TradeResult<Self> {
        if !(0.0..=1.0).contains(&liquidation_probability) {
            return Err(TradeError::InvalidConfig(format!(
                "liquidation_probability must be in [0, 1], got {liquidation_probability}"
            )));
        }
        Ok(Self {
            risk_table,
            liquidation_probability,
            rng: Mutex::new(rng),
        })
    }
}

impl TradeResolver for RandomResolver {
    fn needs_price(&self) -> bool {
        false
    }

    fn resolve(&self, trade: &Trade, _price: Option<Price>, now: DateTime<Utc>) -> Resolution {
        if now < trade.completion_deadline {
            return Resolution::Active;
        }
        if self.rng.lock().gen_bool(self.liquidation_probability) {
            Resolution::Liquidated
        } else {
            Resolution::Completed {
                reward: self.risk_table.reward(trade.risk_tier),
            }
        }
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Configured resolver strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    #[default]
    Price,
    Random,
}

pub fn build_resolver(
    kind: ResolverKind,
    risk_table: RiskTable,
    liquidation_probability: f64,
) -> TradeResult<Arc<dyn TradeResolver>> {
    Ok(match kind {
        ResolverKind::Price => Arc::new(PriceResolver::new(risk_table)),
        ResolverKind::Random => Arc::new(RandomResolver::new(risk_table, liquidation_probability)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use forge_core::{BuildingId, RiskTier, RiskTierSpec, TradeStatus, UserId};
    use rust_decimal_macros::dec;

    fn table() -> RiskTable {
        let mut table = RiskTable::default();
        table.medium = RiskTierSpec {
            duration_secs: 600,
            liquidation_threshold: dec!(0.005),
            reward: 100,
        };
        table
    }

    fn trade_at(created: DateTime<Utc>) -> Trade {
        let table = table();
        let mut trade = Trade::open(
            BuildingId::new(),
            UserId::new(),
            "ETH",
            RiskTier::Medium,
            table.get(RiskTier::Medium),
            10,
            Price::new(dec!(3000)),
            created,
        )
        .unwrap();
        trade.status = TradeStatus::Active;
        trade
    }

    #[test]
    fn test_liquidates_below_threshold() {
        let now = Utc::now();
        let trade = trade_at(now);
        assert_eq!(trade.liquidation_price, Price::new(dec!(2985)));

        let resolver = PriceResolver::new(table());
        let outcome = resolver.resolve(&trade, Some(Price::new(dec!(2980))), now);
        assert_eq!(outcome, Resolution::Liquidated);
    }

    #[test]
    fn test_liquidates_exactly_at_threshold() {
        let now = Utc::now();
        let trade = trade_at(now);
        let resolver = PriceResolver::new(table());
        assert_eq!(
            resolver.resolve(&trade, Some(Price::new(dec!(2985))), now),
            Resolution::Liquidated
        );
    }

    #[test]
    fn test_completes_after_deadline_with_tier_reward() {
        let created = Utc::now() - Duration::seconds(601);
        let trade = trade_at(created);
        let resolver = PriceResolver::new(table());

        let outcome = resolver.resolve(&trade, Some(Price::new(dec!(3050))), Utc::now());
        assert_eq!(outcome, Resolution::Completed { reward: 100 });

        // Reward does not grow with lateness.
        let much_later = trade.completion_deadline + Duration::days(3);
        assert_eq!(
            resolver.resolve(&trade, Some(Price::new(dec!(3050))), much_later),
            Resolution::Completed { reward: 100 }
        );
    }

    #[test]
    fn test_liquidation_takes_precedence_over_deadline() {
        let created = Utc::now() - Duration::seconds(3600);
        let trade = trade_at(created);
        let resolver = PriceResolver::new(table());

        let outcome = resolver.resolve(&trade, Some(Price::new(dec!(2900))), Utc::now());
        assert_eq!(outcome, Resolution::Liquidated);
    }

    #[test]
    fn test_stays_active_before_deadline_above_threshold() {
        let now = Utc::now();
        let trade = trade_at(now);
        let resolver = PriceResolver::new(table());
        assert_eq!(
            resolver.resolve(&trade, Some(Price::new(dec!(2990))), now + Duration::seconds(10)),
            Resolution::Active
        );
    }

    #[test]
    fn test_missing_price_stays_active() {
        let created = Utc::now() - Duration::seconds(3600);
        let trade = trade_at(created);
        let resolver = PriceResolver::new(table());
        assert_eq!(resolver.resolve(&trade, None, Utc::now()), Resolution::Active);
    }

    #[test]
    fn test_random_resolver_waits_for_deadline() {
        let now = Utc::now();
        let trade = trade_at(now);
        let resolver = RandomResolver::with_seed(table(), 1.0, 7).unwrap();
        assert!(!resolver.needs_price());
        assert_eq!(resolver.resolve(&trade, None, now), Resolution::Active);
    }

    #[test]
    fn test_random_resolver_extremes() {
        let trade = trade_at(Utc::now() - Duration::seconds(700));
        let now = Utc::now();

        let always = RandomResolver::with_seed(table(), 1.0, 1).unwrap();
        let never = RandomResolver::with_seed(table(), 0.0, 1).unwrap();
        for _ in 0..20 {
            assert_eq!(always.resolve(&trade, None, now), Resolution::Liquidated);
            assert_eq!(
                never.resolve(&trade, None, now),
                Resolution::Completed { reward: 100 }
            );
        }
    }

    #[test]
    fn test_random_resolver_rejects_bad_probability() {
        assert!(RandomResolver::new(table(), 1.5).is_err());
        assert!(RandomResolver::new(table(), -0.1).is_err());
    }

    #[test]
    fn test_build_resolver_by_kind() {
        let price = build_resolver(ResolverKind::Price, table(), 0.5).unwrap();
        assert!(price.needs_price());
        let random = build_resolver(ResolverKind::Random, table(), 0.5).unwrap();
        assert!(!random.needs_price());
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(Resolution::Liquidated.as_str(), "liquidated");
        assert!(Resolution::Completed { reward: 1 }.is_terminal());
        assert!(!Resolution::Active.is_terminal());
    }
}
