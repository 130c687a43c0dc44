//! Damage and reward per tick.

use forge_core::CharacterDungeon;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Spread of a single hit around the rating: ±10%.
const SPREAD_LOW: f64 = 0.9;
const SPREAD_HIGH: f64 = 1.1;

/// Rolls `round(uniform(0.9r, 1.1r))` damage and converts it to reward at a
/// fixed ratio of cumulative damage.
pub struct DamageRoll {
    reward_per_damage: Decimal,
    rng: Mutex<StdRng>,
}

impl DamageRoll {
    pub fn new(reward_per_damage: Decimal) -> Self {
        Self::with_rng(reward_per_damage, StdRng::from_entropy())
    }

    /// Deterministic sequence for tests and replays.
    pub fn with_seed(reward_per_damage: Decimal, seed: u64) -> Self {
        Self::with_rng(reward_per_damage, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reward_per_damage: Decimal, rng: StdRng) -> Self {
        Self {
            reward_per_damage,
            rng: Mutex::new(rng),
        }
    }

    /// Damage for one tick at `rating`. Zero rating deals zero damage.
    pub fn damage(&self, rating: u32) -> u64 {
        if rating == 0 {
            return 0;
        }
        let rating = f64::from(rating);
        let roll = self
            .rng
            .lock()
            .gen_range(rating * SPREAD_LOW..=rating * SPREAD_HIGH);
        // Non-negative and bounded by 1.1 * u32::MAX.
        roll.round() as u64
    }

    /// `round(damage × reward_per_damage)`, halves away from zero.
    pub fn reward(&self, damage: u64) -> u64 {
        (Decimal::from(damage) * self.reward_per_damage)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
            .unwrap_or(0)
    }

    /// Roll one hit for `enrollment`, returning the damage and the reward it
    /// adds.
    ///
    /// The reward is taken from the new cumulative damage, so the
    /// enrollment's total stays `round(total_damage × reward_per_damage)`
    /// even when a single hit is worth less than one token.
    pub fn hit(&self, enrollment: &CharacterDungeon) -> (u64, u64) {
        let damage = self.damage(enrollment.starting_damage_rating);
        let total_damage = enrollment.total_damage.saturating_add(damage);
        let reward = self
            .reward(total_damage)
            .saturating_sub(enrollment.total_reward);
        (damage, reward)
    }
}
