//! Precision-safe price type.
//!
//! Uses `rust_decimal` for exact decimal arithmetic so that the liquidation
//! threshold comparison is not subject to floating-point rounding.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Strictly greater than zero. Oracles and trade entry reject anything else.
    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Price at which a position opened at `self` is liquidated.
    ///
    /// `threshold` is a fraction (0.005 = 0.5%): `entry × (1 − threshold)`.
    #[inline]
    #[must_use]
    pub fn liquidation_level(&self, threshold: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE - threshold))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
