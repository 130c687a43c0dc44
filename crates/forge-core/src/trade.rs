//! Trade and building records.
//!
//! A trade is a time-boxed simulated leveraged position opened on a
//! building. Its lifecycle is a closed state machine:
//!
//! ```text
//! Pending ──► Active ──┬──► Completed
//!                      └──► Liquidated
//! ```
//!
//! The building mirrors its current trade's status and returns to `Idle`
//! only when the API layer processes the user's claim.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use crate::ids::{BuildingId, TradeId, UserId};

// ============================================================================
// RiskTier
// ============================================================================

/// Risk tier a user selects when starting a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [RiskTier::Low, RiskTier::Medium, RiskTier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::UnknownRiskTier(other.to_string())),
        }
    }
}

/// Duration, liquidation threshold and reward of one risk tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTierSpec {
    /// Time from trade start to completion deadline (seconds).
    pub duration_secs: u64,
    /// Fractional drop from entry price that liquidates the trade (0.005 = 0.5%).
    pub liquidation_threshold: Decimal,
    /// Tokens paid out on completion.
    pub reward: u64,
}

impl RiskTierSpec {
    pub fn duration(&self) -> Duration {
        Duration::seconds(i64::try_from(self.duration_secs).unwrap_or(i64::MAX))
    }

    /// Validate tier parameters.
    pub fn validate(&self, tier: RiskTier) -> Result<()> {
        if self.duration_secs == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "risk tier {tier}: duration_secs must be > 0"
            )));
        }
        if self.liquidation_threshold <= Decimal::ZERO || self.liquidation_threshold >= Decimal::ONE
        {
            return Err(CoreError::InvalidConfig(format!(
                "risk tier {tier}: liquidation_threshold must be in (0, 1), got {}",
                self.liquidation_threshold
            )));
        }
        Ok(())
    }
}

/// Static reward/threshold table, one entry per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskTable {
    pub low: RiskTierSpec,
    pub medium: RiskTierSpec,
    pub high: RiskTierSpec,
}

impl RiskTable {
    #[must_use]
    pub fn get(&self, tier: RiskTier) -> &RiskTierSpec {
        match tier {
            RiskTier::Low => &self.low,
            RiskTier::Medium => &self.medium,
            RiskTier::High => &self.high,
        }
    }

    /// Reward paid when a trade of `tier` completes.
    #[must_use]
    pub fn reward(&self, tier: RiskTier) -> u64 {
        self.get(tier).reward
    }

    pub fn validate(&self) -> Result<()> {
        for tier in RiskTier::ALL {
            self.get(tier).validate(tier)?;
        }
        Ok(())
    }
}

impl Default for RiskTable {
    fn default() -> Self {
        Self {
            low: RiskTierSpec {
                duration_secs: 3_600,
                liquidation_threshold: dec!(0.02),
                reward: 50,
            },
            medium: RiskTierSpec {
                duration_secs: 1_800,
                liquidation_threshold: dec!(0.01),
                reward: 100,
            },
            high: RiskTierSpec {
                duration_secs: 900,
                liquidation_threshold: dec!(0.005),
                reward: 200,
            },
        }
    }
}

// ============================================================================
// TradeStatus / ClaimState
// ============================================================================

/// Trade lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Active,
    Completed,
    Liquidated,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Liquidated => "liquidated",
        }
    }

    /// Completed and liquidated are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Liquidated)
    }

    /// The only legal edges are pending→active and active→{completed, liquidated}.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Liquidated)
        )
    }

    /// Validate a transition, returning the target state.
    pub fn transition(&self, next: TradeStatus) -> Result<TradeStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "liquidated" => Ok(Self::Liquidated),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Whether a resolved trade's reward has been collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    #[default]
    Unclaimed,
    Claimed,
    /// Liquidated trades have nothing to claim.
    NotApplicable,
}

// ============================================================================
// Trade
// ============================================================================

/// A trade row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub building_id: BuildingId,
    pub user_id: UserId,
    /// Asset the trade tracks (e.g. "ETH").
    pub symbol: String,
    pub risk_tier: RiskTier,
    pub status: TradeStatus,
    /// Energy already charged when the trade was opened.
    pub energy_cost: u32,
    pub entry_price: Price,
    /// `entry_price × (1 − threshold)`, fixed at creation.
    pub liquidation_price: Price,
    /// Fixed at creation.
    pub completion_deadline: DateTime<Utc>,
    /// Set only on completion.
    #[serde(default)]
    pub reward: Option<u64>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim_state: ClaimState,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Open a new trade in `Pending` state.
    ///
    /// Derives the liquidation price and completion deadline from the tier
    /// settings; both are immutable afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        building_id: BuildingId,
        user_id: UserId,
        symbol: impl Into<String>,
        risk_tier: RiskTier,
        spec: &RiskTierSpec,
        energy_cost: u32,
        entry_price: Price,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !entry_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }

        Ok(Self {
            id: TradeId::new(),
            building_id,
            user_id,
            symbol: symbol.into(),
            risk_tier,
            status: TradeStatus::Pending,
            energy_cost,
            entry_price,
            liquidation_price: entry_price.liquidation_level(spec.liquidation_threshold),
            completion_deadline: now + spec.duration(),
            reward: None,
            resolved_at: None,
            claim_state: ClaimState::Unclaimed,
            created_at: now,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == TradeStatus::Active
    }
}

// ============================================================================
// Building
// ============================================================================

/// Building status, mirroring the lifecycle of its current trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingStatus {
    #[default]
    Idle,
    Active,
    Completed,
    Liquidated,
}

impl BuildingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Liquidated => "liquidated",
        }
    }

    /// Building status that mirrors a trade status.
    ///
    /// A pending trade has already reserved its building, so it maps to
    /// `Active` as well.
    pub fn mirroring(status: TradeStatus) -> Self {
        match status {
            TradeStatus::Pending | TradeStatus::Active => Self::Active,
            TradeStatus::Completed => Self::Completed,
            TradeStatus::Liquidated => Self::Liquidated,
        }
    }

    /// idle→active when a trade starts, active→{completed, liquidated} with
    /// its trade, and back to idle once the outcome is collected.
    pub fn can_transition_to(&self, next: BuildingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Liquidated)
                | (Self::Completed, Self::Idle)
                | (Self::Liquidated, Self::Idle)
        )
    }

    /// Validate a transition, returning the target state.
    pub fn transition(&self, next: BuildingStatus) -> Result<BuildingStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for BuildingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "liquidated" => Ok(Self::Liquidated),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// A building row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub slot: u32,
    pub owner: UserId,
    pub status: BuildingStatus,
}

impl Building {
    #[must_use]
    pub fn new(slot: u32, owner: UserId) -> Self {
        Self {
            id: BuildingId::new(),
            slot,
            owner,
            status: BuildingStatus::Idle,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
