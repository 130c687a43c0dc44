//! Dungeon worker error types.

use forge_core::{CharacterId, EnrollmentId};
use forge_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DungeonError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid dungeon configuration: {0}")]
    InvalidConfig(String),
}

pub type DungeonResult<T> = Result<T, DungeonError>;

/// Why a claim was refused or failed.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Enrollment not found: {0}")]
    NotFound(EnrollmentId),

    #[error("Enrollment {0} belongs to another user")]
    NotOwner(EnrollmentId),

    #[error("Enrollment {0} is not finished")]
    NotFinished(EnrollmentId),

    #[error("Enrollment {0} is already claimed")]
    AlreadyClaimed(EnrollmentId),

    #[error("Nothing to claim for character {0}")]
    NothingToClaim(CharacterId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SettlementError {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotOwner(_) => "not_owner",
            Self::NotFinished(_) => "not_finished",
            Self::AlreadyClaimed(_) => "already_claimed",
            Self::NothingToClaim(_) => "nothing_to_claim",
            Self::Store(_) => "store_error",
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;
