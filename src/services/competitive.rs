// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Competitive standings: tier and last known leaderboard position per user.
//!
//! A standing's tier follows its points through the ladder, except that a
//! leaderboard position at or inside the elite cutoff forces the elite tier.
//! The override sticks across score syncs until a later position update
//! moves the user outside the cutoff.

use serde::Serialize;
use std::sync::Arc;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{CompetitiveStanding, RankTier};
use crate::services::events::{DomainEvent, EventBus};
use crate::services::ledger::ScoreLedger;
use crate::services::ranks::TierLadder;

/// Largest page served by `standings_by_tier`.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Where a standing sits relative to the next tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TierProgress {
    pub next_tier: Option<RankTier>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub points_to_next: u64,
}

/// Result of `bootstrap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub standing: CompetitiveStanding,
    /// `false` when the standing already existed
    pub created: bool,
}

fn new_standing(user_id: &str, total_points: u64, tier: RankTier, now: &str) -> CompetitiveStanding {
    CompetitiveStanding {
        user_id: user_id.to_string(),
        total_points,
        tier,
        leaderboard_position: None,
        created_at: now.to_string(),
        updated_at: now.to_string(),
    }
}

/// Standing after a new ledger total.
fn apply_total(
    current: Option<CompetitiveStanding>,
    user_id: &str,
    new_total: u64,
    ladder: &TierLadder,
    cutoff: u32,
    now: &str,
) -> CompetitiveStanding {
    let Some(mut standing) = current else {
        return new_standing(user_id, new_total, ladder.classify(new_total), now);
    };

    // Totals only grow; a smaller one is a late redelivery.
    standing.total_points = standing.total_points.max(new_total);
    standing.tier = if standing.holds_elite_position(cutoff) {
        RankTier::ELITE
    } else {
        ladder.classify(standing.total_points)
    };
    standing.updated_at = now.to_string();
    standing
}

/// Standing after a leaderboard position report.
fn apply_position(
    current: Option<CompetitiveStanding>,
    user_id: &str,
    position: u32,
    fallback_total: u64,
    ladder: &TierLadder,
    cutoff: u32,
    now: &str,
) -> CompetitiveStanding {
    let mut standing = current.unwrap_or_else(|| {
        new_standing(user_id, fallback_total, ladder.classify(fallback_total), now)
    });

    standing.leaderboard_position = Some(position);
    standing.tier = if position <= cutoff {
        RankTier::ELITE
    } else {
        ladder.classify(standing.total_points)
    };
    standing.updated_at = now.to_string();
    standing
}

#[derive(Clone)]
pub struct CompetitiveSynchronizer {
    db: FirestoreDb,
    ledger: ScoreLedger,
    ladder: Arc<TierLadder>,
    events: EventBus,
    elite_cutoff: u32,
}

impl CompetitiveSynchronizer {
    pub fn new(
        db: FirestoreDb,
        ledger: ScoreLedger,
        ladder: Arc<TierLadder>,
        events: EventBus,
        elite_cutoff: u32,
    ) -> Self {
        Self {
            db,
            ledger,
            ladder,
            events,
            elite_cutoff,
        }
    }

    pub fn ladder(&self) -> &TierLadder {
        &self.ladder
    }

    /// Create the user's standing unless it already exists.
    ///
    /// Only a call that actually creates the standing publishes
    /// `competitive_profile_created`.
    pub async fn bootstrap(&self, user_id: &str) -> Result<BootstrapOutcome> {
        if let Some(existing) = self.db.get_standing(user_id).await? {
            tracing::info!(user_id, "Competitive standing already exists (idempotent skip)");
            return Ok(BootstrapOutcome {
                standing: existing,
                created: false,
            });
        }

        let total_points = match self.ledger.total_points_for(user_id).await {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "Ledger total unavailable during bootstrap; starting from 0"
                );
                0
            }
        };

        let now = crate::time_utils::now_rfc3339();
        let standing = new_standing(
            user_id,
            total_points,
            self.ladder.classify(total_points),
            &now,
        );

        if !self.db.create_standing_if_absent(&standing).await? {
            tracing::info!(user_id, "Competitive standing created concurrently (idempotent skip)");
            let existing = self.db.get_standing(user_id).await?.ok_or_else(|| {
                AppError::Database(format!(
                    "Standing {} vanished after create conflict",
                    user_id
                ))
            })?;
            return Ok(BootstrapOutcome {
                standing: existing,
                created: false,
            });
        }

        tracing::info!(
            user_id,
            total_points,
            tier = %standing.tier,
            "Competitive standing bootstrapped"
        );

        self.events
            .publish(DomainEvent::CompetitiveProfileCreated {
                user_id: user_id.to_string(),
                total_points,
            })
            .await;

        Ok(BootstrapOutcome {
            standing,
            created: true,
        })
    }

    /// Apply a new ledger total, creating the standing if needed.
    pub async fn sync_from_score(
        &self,
        user_id: &str,
        new_total: u64,
    ) -> Result<CompetitiveStanding> {
        let now = crate::time_utils::now_rfc3339();
        let ladder = self.ladder.clone();
        let cutoff = self.elite_cutoff;

        let standing = self
            .db
            .update_standing(user_id, |current| {
                apply_total(current, user_id, new_total, &ladder, cutoff, &now)
            })
            .await?;

        tracing::debug!(
            user_id,
            total_points = standing.total_points,
            tier = %standing.tier,
            "Standing synced from score"
        );

        Ok(standing)
    }

    /// Record a leaderboard position and re-derive the tier from it.
    ///
    /// Never changes `total_points` of an existing standing. A missing
    /// standing is created from the ledger total.
    pub async fn apply_position_override(
        &self,
        user_id: &str,
        position: u32,
    ) -> Result<CompetitiveStanding> {
        let fallback_total = match self.db.get_standing(user_id).await? {
            Some(_) => 0,
            None => self.ledger.total_points_for(user_id).await?,
        };

        let now = crate::time_utils::now_rfc3339();
        let ladder = self.ladder.clone();
        let cutoff = self.elite_cutoff;

        let standing = self
            .db
            .update_standing(user_id, |current| {
                apply_position(
                    current,
                    user_id,
                    position,
                    fallback_total,
                    &ladder,
                    cutoff,
                    &now,
                )
            })
            .await?;

        tracing::debug!(
            user_id,
            position,
            tier = %standing.tier,
            elite = position <= cutoff,
            "Leaderboard position applied to standing"
        );

        Ok(standing)
    }

    pub async fn standing(&self, user_id: &str) -> Result<Option<CompetitiveStanding>> {
        self.db.get_standing(user_id).await
    }

    /// Standings holding `tier`, highest points first.
    pub async fn standings_by_tier(
        &self,
        tier: RankTier,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CompetitiveStanding>> {
        self.db
            .list_standings_by_tier(tier, limit.clamp(1, MAX_PAGE_SIZE), offset)
            .await
    }

    pub fn progress(&self, standing: &CompetitiveStanding) -> TierProgress {
        TierProgress {
            next_tier: self.ladder.next_tier(standing.tier),
            points_to_next: self
                .ladder
                .points_to_next(standing.tier, standing.total_points),
        }
    }
}
