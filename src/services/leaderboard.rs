// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Leaderboard ranking.
//!
//! Positions are maintained two ways:
//! - incrementally: an upsert recomputes only the touched entry's position
//!   by counting the entries ranked ahead of it;
//! - in bulk: `recalculate_all` sorts every entry once and rewrites any
//!   position that drifted.
//!
//! The bulk sweep is not isolated from concurrent upserts. A position
//! written by an upsert during the sweep may be replaced with the sweep's
//! stale value until the next upsert or sweep.

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::LeaderboardEntry;
use crate::services::events::{DomainEvent, EventBus};

/// Largest page served by `page`.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Result of an incremental upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub entry: LeaderboardEntry,
    /// Position before this upsert (`None` if the entry was created)
    pub previous_position: Option<u32>,
}

impl UpsertOutcome {
    pub fn created(&self) -> bool {
        self.previous_position.is_none()
    }
}

/// Result of a full recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RecalculationSummary {
    pub total_entries: u64,
    /// Entries whose stored position changed
    pub updated: u64,
}

#[derive(Clone)]
pub struct LeaderboardRanker {
    db: FirestoreDb,
    events: EventBus,
}

impl LeaderboardRanker {
    pub fn new(db: FirestoreDb, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Create or update a user's entry and recompute its position.
    ///
    /// Publishes `leaderboard_position_changed` with the resulting position.
    /// Totals only grow, so a total below the stored one is a stale
    /// redelivery and leaves the stored points as they are.
    pub async fn upsert(&self, user_id: &str, total_points: u64) -> Result<UpsertOutcome> {
        let outcome = match self.apply_total(user_id, total_points).await? {
            Some(outcome) => outcome,
            None => match self.create(user_id, total_points).await? {
                Some(entry) => UpsertOutcome {
                    entry,
                    previous_position: None,
                },
                // Lost a create race; the winner's entry is updated instead.
                None => self
                    .apply_total(user_id, total_points)
                    .await?
                    .ok_or_else(|| {
                        AppError::Database(format!(
                            "Leaderboard entry {} vanished after create conflict",
                            user_id
                        ))
                    })?,
            },
        };

        tracing::debug!(
            user_id,
            total_points = outcome.entry.total_points,
            position = outcome.entry.position,
            previous_position = ?outcome.previous_position,
            "Leaderboard entry upserted"
        );

        self.events
            .publish(DomainEvent::LeaderboardPositionChanged {
                user_id: outcome.entry.user_id.clone(),
                position: outcome.entry.position,
                total_points: outcome.entry.total_points,
            })
            .await;

        Ok(outcome)
    }

    /// Create an entry if the user has none; never touches an existing one.
    ///
    /// Returns the stored entry and whether this call created it.
    pub async fn ensure_entry(
        &self,
        user_id: &str,
        total_points: u64,
    ) -> Result<(LeaderboardEntry, bool)> {
        if let Some(existing) = self.db.get_entry(user_id).await? {
            tracing::debug!(user_id, "Leaderboard entry already exists (idempotent skip)");
            return Ok((existing, false));
        }

        match self.create(user_id, total_points).await? {
            Some(entry) => {
                tracing::info!(
                    user_id,
                    position = entry.position,
                    "Leaderboard entry created"
                );
                Ok((entry, true))
            }
            None => {
                let existing = self.db.get_entry(user_id).await?.ok_or_else(|| {
                    AppError::Database(format!(
                        "Leaderboard entry {} vanished after create conflict",
                        user_id
                    ))
                })?;
                Ok((existing, false))
            }
        }
    }

    /// Create a new entry; `None` if another writer created it first.
    async fn create(&self, user_id: &str, total_points: u64) -> Result<Option<LeaderboardEntry>> {
        let now = crate::time_utils::now_rfc3339();
        let mut entry = LeaderboardEntry {
            user_id: user_id.to_string(),
            total_points,
            position: 1,
            created_at: now.clone(),
            updated_at: now,
        };
        entry.position = self.position_for(&entry).await?;

        if self.db.create_entry_if_absent(&entry).await? {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    /// Merge a total into an existing entry, then recompute its position.
    ///
    /// The points merge is atomic per entry; the position is written
    /// separately and may be briefly stale under concurrent upserts.
    /// Returns `None` if the user has no entry yet.
    async fn apply_total(&self, user_id: &str, total_points: u64) -> Result<Option<UpsertOutcome>> {
        let now = crate::time_utils::now_rfc3339();
        let updated = self
            .db
            .update_entry(user_id, move |stored| {
                let mut next = stored.clone();
                next.total_points = stored.total_points.max(total_points);
                next.updated_at = now;
                next
            })
            .await?;

        let Some((before, mut entry)) = updated else {
            return Ok(None);
        };

        if total_points < before.total_points {
            tracing::debug!(
                user_id,
                stored = before.total_points,
                received = total_points,
                "Ignoring stale total"
            );
        }

        entry.position = self.position_for(&entry).await?;
        self.db
            .set_entry_positions(std::slice::from_ref(&entry))
            .await?;

        Ok(Some(UpsertOutcome {
            entry,
            previous_position: Some(before.position),
        }))
    }

    /// 1 + number of entries ranked ahead of `entry`.
    async fn position_for(&self, entry: &LeaderboardEntry) -> Result<u32> {
        let ahead = self.db.count_entries_outranking(entry).await?;
        Ok(u32::try_from(ahead.saturating_add(1)).unwrap_or(u32::MAX))
    }

    /// Reassign every position from a single sorted pass.
    ///
    /// Only entries whose position changed are written, and each of those
    /// publishes `leaderboard_position_changed` so standings reconcile.
    pub async fn recalculate_all(&self) -> Result<RecalculationSummary> {
        let entries = self.db.list_entries_ranked().await?;
        let total_entries = entries.len() as u64;
        let now = crate::time_utils::now_rfc3339();

        let changed: Vec<LeaderboardEntry> = entries
            .into_iter()
            .zip(1u32..)
            .filter(|(entry, position)| entry.position != *position)
            .map(|(mut entry, position)| {
                entry.position = position;
                entry.updated_at = now.clone();
                entry
            })
            .collect();

        self.db.set_entry_positions(&changed).await?;

        for entry in &changed {
            self.events
                .publish(DomainEvent::LeaderboardPositionChanged {
                    user_id: entry.user_id.clone(),
                    position: entry.position,
                    total_points: entry.total_points,
                })
                .await;
        }

        let summary = RecalculationSummary {
            total_entries,
            updated: changed.len() as u64,
        };

        tracing::info!(
            total_entries = summary.total_entries,
            updated = summary.updated,
            "Leaderboard recalculated"
        );

        Ok(summary)
    }

    /// A page of the leaderboard ordered by position.
    pub async fn page(&self, limit: u32, offset: u32) -> Result<Vec<LeaderboardEntry>> {
        self.db
            .list_entries_page(limit.clamp(1, MAX_PAGE_SIZE), offset)
            .await
    }

    pub async fn position_of(&self, user_id: &str) -> Result<Option<LeaderboardEntry>> {
        self.db.get_entry(user_id).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.db.count_entries().await
    }
}
