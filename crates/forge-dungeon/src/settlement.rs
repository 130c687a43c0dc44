//! Dungeon reward settlement.
//!
//! A claim is a guarded store update (finished, unclaimed, owned by the
//! caller) taken before the balance is credited. If the credit fails the
//! claim is released again, so claim and credit succeed or fail together.
//! Two concurrent claims on one enrollment: exactly one passes the guard.

use chrono::Utc;
use forge_core::{CharacterDungeon, CharacterId, EnrollmentId, UserId};
use forge_store::{BalanceStore, DungeonStore};
use forge_telemetry::Metrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{SettlementError, SettlementResult};

/// What a successful claim paid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub user_id: UserId,
    pub enrollment_ids: Vec<EnrollmentId>,
    pub reward: u64,
    /// Balance after the credit.
    pub balance: u64,
}

pub struct RewardSettlement {
    dungeon: Arc<dyn DungeonStore>,
    balances: Arc<dyn BalanceStore>,
    purge_events_on_claim: bool,
}

impl RewardSettlement {
    pub fn new(
        dungeon: Arc<dyn DungeonStore>,
        balances: Arc<dyn BalanceStore>,
        purge_events_on_claim: bool,
    ) -> Self {
        Self {
            dungeon,
            balances,
            purge_events_on_claim,
        }
    }

    /// Pay out one finished enrollment to its owner.
    pub async fn claim(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> SettlementResult<ClaimReceipt> {
        let result = self.claim_one(enrollment_id, user_id).await;
        record(&result);
        result
    }

    /// Pay out every finished, unclaimed enrollment of a character with a
    /// single credit.
    pub async fn claim_all(
        &self,
        character_id: CharacterId,
        user_id: UserId,
    ) -> SettlementResult<ClaimReceipt> {
        let result = self.claim_batch(character_id, user_id).await;
        record(&result);
        result
    }

    async fn claim_one(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> SettlementResult<ClaimReceipt> {
        let enrollment = self
            .dungeon
            .find_enrollment(enrollment_id)
            .await?
            .ok_or(SettlementError::NotFound(enrollment_id))?;

        if enrollment.user_id != user_id {
            return Err(SettlementError::NotOwner(enrollment_id));
        }
        if enrollment.finished_at.is_none() {
            return Err(SettlementError::NotFinished(enrollment_id));
        }
        if enrollment.is_claimed() {
            return Err(SettlementError::AlreadyClaimed(enrollment_id));
        }

        // Checks above passed, so a rejected guard means a concurrent claim won.
        let claimed = self
            .dungeon
            .claim_enrollment(enrollment_id, user_id, Utc::now())
            .await?
            .ok_or(SettlementError::AlreadyClaimed(enrollment_id))?;

        let balance = match self.balances.credit(user_id, claimed.total_reward).await {
            Ok(balance) => balance,
            Err(e) => {
                self.release(std::slice::from_ref(&claimed)).await;
                return Err(e.into());
            }
        };

        info!(
            %enrollment_id,
            %user_id,
            reward = claimed.total_reward,
            damage = claimed.total_damage,
            balance,
            "Dungeon reward claimed"
        );
        self.purge(std::slice::from_ref(&claimed)).await;

        Ok(ClaimReceipt {
            user_id,
            enrollment_ids: vec![enrollment_id],
            reward: claimed.total_reward,
            balance,
        })
    }

    async fn claim_batch(
        &self,
        character_id: CharacterId,
        user_id: UserId,
    ) -> SettlementResult<ClaimReceipt> {
        let claimable = self.dungeon.list_claimable(character_id).await?;
        if claimable.is_empty() {
            return Err(SettlementError::NothingToClaim(character_id));
        }
        if let Some(foreign) = claimable.iter().find(|e| e.user_id != user_id) {
            return Err(SettlementError::NotOwner(foreign.id));
        }

        let now = Utc::now();
        let mut claimed: Vec<CharacterDungeon> = Vec::with_capacity(claimable.len());
        for enrollment in &claimable {
            match self.dungeon.claim_enrollment(enrollment.id, user_id, now).await {
                Ok(Some(row)) => claimed.push(row),
                Ok(None) => {
                    debug!(enrollment_id = %enrollment.id, "Enrollment claimed concurrently, skipped");
                }
                Err(e) => {
                    self.release(&claimed).await;
                    return Err(e.into());
                }
            }
        }

        if claimed.is_empty() {
            return Err(SettlementError::NothingToClaim(character_id));
        }

        let reward = claimed
            .iter()
            .fold(0u64, |sum, e| sum.saturating_add(e.total_reward));
        let balance = match self.balances.credit(user_id, reward).await {
            Ok(balance) => balance,
            Err(e) => {
                self.release(&claimed).await;
                return Err(e.into());
            }
        };

        info!(
            %character_id,
            %user_id,
            enrollments = claimed.len(),
            reward,
            balance,
            "Dungeon rewards claimed"
        );
        self.purge(&claimed).await;

        Ok(ClaimReceipt {
            user_id,
            enrollment_ids: claimed.iter().map(|e| e.id).collect(),
            reward,
            balance,
        })
    }

    /// Undo claims whose credit did not happen.
    async fn release(&self, claimed: &[CharacterDungeon]) {
        for enrollment in claimed {
            let Some(claimed_at) = enrollment.claimed_at else {
                continue;
            };
            match self.dungeon.release_claim(enrollment.id, claimed_at).await {
                Ok(true) => {
                    warn!(enrollment_id = %enrollment.id, "Claim released after failed credit");
                }
                Ok(false) => {
                    warn!(enrollment_id = %enrollment.id, "Claim changed before release");
                }
                Err(e) => {
                    // Marked claimed but never paid; needs operator attention.
                    error!(
                        enrollment_id = %enrollment.id,
                        user_id = %enrollment.user_id,
                        reward = enrollment.total_reward,
                        error = %e,
                        "Failed to release claim after failed credit"
                    );
                }
            }
        }
    }

    async fn purge(&self, claimed: &[CharacterDungeon]) {
        if !self.purge_events_on_claim {
            return;
        }
        for enrollment in claimed {
            match self.dungeon.purge_events(enrollment.id).await {
                Ok(purged) => debug!(enrollment_id = %enrollment.id, purged, "Events purged"),
                Err(e) => warn!(enrollment_id = %enrollment.id, error = %e, "Failed to purge events"),
            }
        }
    }
}

fn record(result: &SettlementResult<ClaimReceipt>) {
    match result {
        Ok(_) => Metrics::dungeon_claim("claimed"),
        Err(SettlementError::Store(e)) => {
            warn!(error = %e, "Claim failed on store error");
            Metrics::dungeon_claim("store_error");
        }
        Err(e) => {
            debug!(error = %e, "Claim rejected");
            Metrics::dungeon_claim(e.as_str());
        }
    }
}
