//! Dungeon records.
//!
//! A `DungeonRun` is one global fixed-length cycle. Each eligible character
//! gets one `CharacterDungeon` enrollment per run, which accumulates damage
//! and reward from append-only `DungeonEvent`s until the run finishes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CharacterId, EnrollmentId, EventId, RunId, UserId};

/// A character as seen by the dungeon: only its owner and current rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub user_id: UserId,
    /// Aggregate combat strength derived from equipment.
    pub damage_rating: u32,
}

impl Character {
    /// Only characters with a positive rating are enrolled.
    pub fn is_eligible(&self) -> bool {
        self.damage_rating > 0
    }
}

// ============================================================================
// DungeonRun
// ============================================================================

/// One global dungeon cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DungeonRun {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    /// `None` while the run is open.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl DungeonRun {
    #[must_use]
    pub fn start(started_at: DateTime<Utc>, duration_secs: u64) -> Self {
        Self {
            id: RunId::new(),
            started_at,
            duration_secs,
            finished_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Wall-clock instant at which the run ends.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.started_at + Duration::seconds(i64::try_from(self.duration_secs).unwrap_or(i64::MAX))
    }

    /// Time left before the deadline, zero if it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.deadline() - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

// ============================================================================
// CharacterDungeon
// ============================================================================

/// A character's enrollment in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterDungeon {
    pub id: EnrollmentId,
    pub character_id: CharacterId,
    pub user_id: UserId,
    pub run_id: RunId,
    /// Rating snapshot taken at enrollment; later equipment changes do not apply.
    pub starting_damage_rating: u32,
    pub total_damage: u64,
    pub total_reward: u64,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl CharacterDungeon {
    /// Snapshot `character` into a fresh enrollment for `run`.
    #[must_use]
    pub fn enroll(character: &Character, run: &DungeonRun, now: DateTime<Utc>) -> Self {
        Self {
            id: EnrollmentId::new(),
            character_id: character.id,
            user_id: character.user_id,
            run_id: run.id,
            starting_damage_rating: character.damage_rating,
            total_damage: 0,
            total_reward: 0,
            joined_at: now,
            finished_at: None,
            claimed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Finished and not yet claimed.
    pub fn is_claimable(&self) -> bool {
        self.finished_at.is_some() && self.claimed_at.is_none()
    }
}

// ============================================================================
// DungeonEvent
// ============================================================================

/// One damage tick for one enrollment. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DungeonEvent {
    pub id: EventId,
    pub enrollment_id: EnrollmentId,
    pub damage: u64,
    pub created_at: DateTime<Utc>,
}

impl DungeonEvent {
    #[must_use]
    pub fn new(enrollment_id: EnrollmentId, damage: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            enrollment_id,
            damage,
            created_at,
        }
    }
}
