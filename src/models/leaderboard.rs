// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Global leaderboard entries.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Leaderboard entry stored in Firestore.
///
/// Stored at: `leaderboard_entries/{user_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardEntry {
    pub user_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub total_points: u64,
    /// 1-based ordinal position (1 is best)
    pub position: u32,
    /// When the entry was first created (RFC3339, microseconds); tie-break key
    pub created_at: String,
    pub updated_at: String,
}

impl LeaderboardEntry {
    /// Total leaderboard order: points descending, then earliest created,
    /// then user ID so entries created in the same microsecond still order
    /// deterministically.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        rank_order(
            (self.total_points, &self.created_at, &self.user_id),
            (other.total_points, &other.created_at, &other.user_id),
        )
    }

    /// Whether `other` ranks strictly ahead of this entry.
    pub fn is_outranked_by(&self, other: &Self) -> bool {
        other.user_id != self.user_id && other.rank_cmp(self) == Ordering::Less
    }
}

/// Compare `(points, created_at, user_id)` keys; `Less` means ranked higher.
pub fn rank_order(a: (u64, &str, &str), b: (u64, &str, &str)) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| a.1.cmp(b.1))
        .then_with(|| a.2.cmp(b.2))
}
