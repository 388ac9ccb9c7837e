// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user competitive standing.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::RankTier;

/// Competitive standing stored in Firestore.
///
/// Stored at: `competitive_standings/{user_id}`
///
/// `tier` is derived from `total_points` unless `leaderboard_position`
/// falls within the elite cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CompetitiveStanding {
    pub user_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_points: u64,
    pub tier: RankTier,
    /// Last position reported by the leaderboard
    #[serde(default)]
    pub leaderboard_position: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
}

impl CompetitiveStanding {
    /// Whether the stored position grants the elite tier.
    pub fn holds_elite_position(&self, cutoff: u32) -> bool {
        self.leaderboard_position.is_some_and(|p| p <= cutoff)
    }
}
