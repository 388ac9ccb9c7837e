// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory document store with the same semantics as the Firestore
//! collections. Used for offline development and tests.
//!
//! Each collection is a `DashMap`; read-modify-write operations hold the
//! per-key shard lock for the duration of the closure.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::{
    CompetitiveStanding, LeaderboardEntry, Profile, RankTier, RankTierRecord, ScoreRecord,
};

#[derive(Default)]
pub struct MemoryStore {
    profiles: DashMap<String, Profile>,
    score_records: DashMap<String, ScoreRecord>,
    rank_tiers: DashMap<RankTier, RankTierRecord>,
    standings: DashMap<String, CompetitiveStanding>,
    entries: DashMap<String, LeaderboardEntry>,
}

impl MemoryStore {
    // ─── Profiles ────────────────────────────────────────────────

    pub fn get_profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }

    pub fn upsert_profile(&self, profile: &Profile) {
        self.profiles
            .insert(profile.user_id.clone(), profile.clone());
    }

    // ─── Score Records ───────────────────────────────────────────

    pub fn insert_score_record(&self, record: &ScoreRecord) {
        self.score_records
            .insert(record.id.clone(), record.clone());
    }

    /// Records for a user, newest first.
    pub fn list_score_records(&self, user_id: &str, limit: Option<u32>) -> Vec<ScoreRecord> {
        let mut records: Vec<ScoreRecord> = self
            .score_records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            records.truncate(limit as usize);
        }
        records
    }

    // ─── Rank Tiers ──────────────────────────────────────────────

    pub fn list_rank_tiers(&self) -> Vec<RankTierRecord> {
        self.rank_tiers.iter().map(|t| t.clone()).collect()
    }

    pub fn insert_rank_tier_if_absent(&self, record: &RankTierRecord) -> bool {
        match self.rank_tiers.entry(record.name) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(record.clone());
                true
            }
        }
    }

    // ─── Competitive Standings ───────────────────────────────────

    pub fn get_standing(&self, user_id: &str) -> Option<CompetitiveStanding> {
        self.standings.get(user_id).map(|s| s.clone())
    }

    pub fn create_standing_if_absent(&self, standing: &CompetitiveStanding) -> bool {
        match self.standings.entry(standing.user_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(standing.clone());
                true
            }
        }
    }

    pub fn update_standing<F>(&self, user_id: &str, f: F) -> CompetitiveStanding
    where
        F: FnOnce(Option<CompetitiveStanding>) -> CompetitiveStanding,
    {
        match self.standings.entry(user_id.to_string()) {
            Entry::Occupied(mut o) => {
                let next = f(Some(o.get().clone()));
                *o.get_mut() = next.clone();
                next
            }
            Entry::Vacant(v) => {
                let next = f(None);
                v.insert(next.clone());
                next
            }
        }
    }

    pub fn list_standings_by_tier(
        &self,
        tier: RankTier,
        limit: u32,
        offset: u32,
    ) -> Vec<CompetitiveStanding> {
        let mut standings: Vec<CompetitiveStanding> = self
            .standings
            .iter()
            .filter(|s| s.tier == tier)
            .map(|s| s.clone())
            .collect();
        standings.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        standings
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    // ─── Leaderboard Entries ─────────────────────────────────────

    pub fn get_entry(&self, user_id: &str) -> Option<LeaderboardEntry> {
        self.entries.get(user_id).map(|e| e.clone())
    }

    pub fn create_entry_if_absent(&self, entry: &LeaderboardEntry) -> bool {
        match self.entries.entry(entry.user_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(entry.clone());
                true
            }
        }
    }

    /// Read-modify-write an existing entry under its map lock.
    pub fn update_entry<F>(&self, user_id: &str, f: F) -> Option<(LeaderboardEntry, LeaderboardEntry)>
    where
        F: FnOnce(&LeaderboardEntry) -> LeaderboardEntry,
    {
        let mut stored = self.entries.get_mut(user_id)?;
        let before = stored.clone();
        let next = f(&before);
        stored.total_points = next.total_points;
        stored.updated_at = next.updated_at.clone();
        Some((before, next))
    }

    /// Write position only.
    pub fn set_entry_position(&self, user_id: &str, position: u32, updated_at: &str) {
        if let Some(mut stored) = self.entries.get_mut(user_id) {
            stored.position = position;
            stored.updated_at = updated_at.to_string();
        }
    }

    pub fn count_entries_outranking(&self, entry: &LeaderboardEntry) -> u64 {
        self.entries
            .iter()
            .filter(|other| entry.is_outranked_by(other))
            .count() as u64
    }

    pub fn list_entries_ranked(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.rank_cmp(b));
        entries
    }

    pub fn list_entries_page(&self, limit: u32, offset: u32) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.rank_cmp(b)));
        entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    pub fn count_entries(&self) -> u64 {
        self.entries.len() as u64
    }
}
