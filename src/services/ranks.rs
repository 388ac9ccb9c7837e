// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rank classification against the tier threshold table.
//!
//! The ladder is pure data: classification never touches storage, so the
//! same ladder is shared by every handler once loaded at startup.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{RankTier, RankTierRecord};

/// Default thresholds seeded into `rank_tiers` when the collection is empty.
pub const DEFAULT_TIERS: [(RankTier, u64); 7] = [
    (RankTier::Bronze, 0),
    (RankTier::Silver, 500),
    (RankTier::Gold, 1_500),
    (RankTier::Platinum, 3_000),
    (RankTier::Diamond, 5_000),
    (RankTier::Master, 7_500),
    (RankTier::Legend, 10_000),
];

/// Problems with the tier reference data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TierError {
    #[error("tier table is empty")]
    Empty,

    #[error("lowest tier {0} is missing")]
    MissingLowest(RankTier),

    #[error("tier {0} appears more than once")]
    Duplicate(RankTier),

    #[error("tier {tier} threshold {minimum} does not exceed the tier below it")]
    NotAscending { tier: RankTier, minimum: u64 },
}

impl From<TierError> for AppError {
    fn from(err: TierError) -> Self {
        AppError::State(err.to_string())
    }
}

/// Ordered tier thresholds, lowest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLadder {
    tiers: Vec<RankTierRecord>,
}

impl Default for TierLadder {
    fn default() -> Self {
        Self {
            tiers: default_records(),
        }
    }
}

fn default_records() -> Vec<RankTierRecord> {
    DEFAULT_TIERS
        .iter()
        .map(|&(name, minimum_points)| RankTierRecord {
            name,
            minimum_points,
        })
        .collect()
}

impl TierLadder {
    /// Build a ladder from stored reference data.
    ///
    /// Records may arrive in any order. The lowest tier must be present and
    /// thresholds must strictly increase with tier rank.
    pub fn from_records(mut records: Vec<RankTierRecord>) -> Result<Self, TierError> {
        if records.is_empty() {
            return Err(TierError::Empty);
        }

        records.sort_by_key(|r| r.name);

        if records[0].name != RankTier::ALL[0] {
            return Err(TierError::MissingLowest(RankTier::ALL[0]));
        }

        for pair in records.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(TierError::Duplicate(pair[1].name));
            }
            if pair[1].minimum_points <= pair[0].minimum_points {
                return Err(TierError::NotAscending {
                    tier: pair[1].name,
                    minimum: pair[1].minimum_points,
                });
            }
        }

        Ok(Self { tiers: records })
    }

    /// Seed the default thresholds if absent, then load the ladder.
    ///
    /// Missing or inconsistent reference data is fatal.
    pub async fn load_or_seed(db: &FirestoreDb) -> Result<Self, AppError> {
        let existing = db.list_rank_tiers().await?;

        if existing.is_empty() {
            let mut seeded = 0;
            for record in default_records() {
                if db.insert_rank_tier_if_absent(&record).await? {
                    seeded += 1;
                }
            }
            tracing::info!(seeded, "Seeded rank tier thresholds");
        }

        let records = db.list_rank_tiers().await?;
        let ladder = Self::from_records(records)?;

        tracing::info!(tiers = ladder.tiers.len(), "Rank tier ladder loaded");
        Ok(ladder)
    }

    /// Tier records, lowest first.
    pub fn tiers(&self) -> &[RankTierRecord] {
        &self.tiers
    }

    /// Lowest tier in the ladder.
    pub fn lowest(&self) -> RankTier {
        self.tiers[0].name
    }

    /// Highest tier whose minimum is at or below `points`.
    pub fn classify(&self, points: u64) -> RankTier {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.minimum_points <= points)
            .map(|t| t.name)
            .unwrap_or_else(|| self.lowest())
    }

    /// Tier above `tier`, or `None` at the top.
    pub fn next_tier(&self, tier: RankTier) -> Option<RankTier> {
        self.tiers
            .iter()
            .position(|t| t.name == tier)
            .and_then(|i| self.tiers.get(i + 1))
            .map(|t| t.name)
    }

    pub fn minimum_for(&self, tier: RankTier) -> Option<u64> {
        self.tiers
            .iter()
            .find(|t| t.name == tier)
            .map(|t| t.minimum_points)
    }

    /// Points still needed to reach the tier above `tier` (0 at the top).
    pub fn points_to_next(&self, tier: RankTier, points: u64) -> u64 {
        self.next_tier(tier)
            .and_then(|next| self.minimum_for(next))
            .map(|minimum| minimum.saturating_sub(points))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        let ladder = TierLadder::default();

        assert_eq!(ladder.classify(0), RankTier::Bronze);
        assert_eq!(ladder.classify(499), RankTier::Bronze);
        assert_eq!(ladder.classify(500), RankTier::Silver);
        assert_eq!(ladder.classify(600), RankTier::Silver);
        assert_eq!(ladder.classify(1_500), RankTier::Gold);
        assert_eq!(ladder.classify(2_999), RankTier::Gold);
        assert_eq!(ladder.classify(3_000), RankTier::Platinum);
        assert_eq!(ladder.classify(5_000), RankTier::Diamond);
        assert_eq!(ladder.classify(7_499), RankTier::Diamond);
        assert_eq!(ladder.classify(7_500), RankTier::Master);
        assert_eq!(ladder.classify(10_000), RankTier::Legend);
        assert_eq!(ladder.classify(u64::MAX), RankTier::Legend);
    }

    #[test]
    fn test_classify_is_monotonic() {
        let ladder = TierLadder::default();
        let mut previous = ladder.classify(0);

        for points in (0..=12_000).step_by(7) {
            let tier = ladder.classify(points);
            assert!(tier >= previous, "tier dropped at {} points", points);
            previous = tier;
        }
    }

    #[test]
    fn test_next_tier_and_points_to_next() {
        let ladder = TierLadder::default();

        assert_eq!(ladder.next_tier(RankTier::Bronze), Some(RankTier::Silver));
        assert_eq!(ladder.next_tier(RankTier::Master), Some(RankTier::Legend));
        assert_eq!(ladder.next_tier(RankTier::Legend), None);

        assert_eq!(ladder.points_to_next(RankTier::Silver, 600), 900);
        assert_eq!(ladder.points_to_next(RankTier::Bronze, 0), 500);
        assert_eq!(ladder.points_to_next(RankTier::Legend, 20_000), 0);
        // Elite override can put a low-point standing in a high tier.
        assert_eq!(ladder.points_to_next(RankTier::Master, 9_000), 1_000);
        assert_eq!(ladder.points_to_next(RankTier::Gold, 9_000), 0);
    }

    #[test]
    fn test_from_records_sorts_unordered_input() {
        let mut records = default_records();
        records.reverse();

        let ladder = TierLadder::from_records(records).unwrap();
        assert_eq!(ladder, TierLadder::default());
    }

    #[test]
    fn test_from_records_rejects_bad_tables() {
        assert_eq!(TierLadder::from_records(vec![]), Err(TierError::Empty));

        let without_lowest: Vec<_> = default_records().into_iter().skip(1).collect();
        assert_eq!(
            TierLadder::from_records(without_lowest),
            Err(TierError::MissingLowest(RankTier::Bronze))
        );

        let mut flat = default_records();
        flat[2].minimum_points = 500;
        assert_eq!(
            TierLadder::from_records(flat),
            Err(TierError::NotAscending {
                tier: RankTier::Gold,
                minimum: 500
            })
        );

        let mut duplicated = default_records();
        duplicated.push(duplicated[3].clone());
        assert_eq!(
            TierLadder::from_records(duplicated),
            Err(TierError::Duplicate(RankTier::Platinum))
        );
    }

    #[tokio::test]
    async fn test_load_or_seed_is_seed_only() {
        let db = FirestoreDb::new_in_memory();

        let first = TierLadder::load_or_seed(&db).await.unwrap();
        assert_eq!(first, TierLadder::default());

        let second = TierLadder::load_or_seed(&db).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(db.list_rank_tiers().await.unwrap().len(), 7);
    }
}
