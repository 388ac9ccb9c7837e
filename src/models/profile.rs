// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile read model for leaderboard rendering.

use serde::{Deserialize, Serialize};

/// Cached copy of a Profile Registry entry.
///
/// Only the display name is kept; the registry owns everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User ID (also used as document ID)
    pub user_id: String,
    pub display_name: String,
    /// When the profile was first seen
    pub created_at: String,
    pub updated_at: String,
}
