// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod leaderboard;
pub mod profile;
pub mod score;
pub mod standing;
pub mod tier;

pub use leaderboard::LeaderboardEntry;
pub use profile::Profile;
pub use score::{NewScore, ScoreRecord, ScoreSource};
pub use standing::CompetitiveStanding;
pub use tier::{RankTier, RankTierRecord};
