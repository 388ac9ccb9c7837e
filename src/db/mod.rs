//! Database layer (Firestore, with an in-memory backend for offline use).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    pub const PROFILES: &str = "profiles";
    /// Append-only score ledger (keyed by record UUID)
    pub const SCORE_RECORDS: &str = "score_records";
    /// Tier threshold seed data (keyed by tier name)
    pub const RANK_TIERS: &str = "rank_tiers";
    /// Competitive standings (keyed by user_id)
    pub const COMPETITIVE_STANDINGS: &str = "competitive_standings";
    /// Leaderboard entries (keyed by user_id)
    pub const LEADERBOARD_ENTRIES: &str = "leaderboard_entries";
}
