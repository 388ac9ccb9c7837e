// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Score ledger: append-only point records and running totals.
//!
//! Workflow for a new score:
//! 1. Validate the submission
//! 2. Persist the record (failures propagate to the caller)
//! 3. Recompute the user's total (retried; falls back to the record's points)
//! 4. Publish `score_changed`

use validator::Validate;

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::{NewScore, ScoreRecord};
use crate::services::events::{DomainEvent, EventBus};

/// Most records returned by one history query.
pub const MAX_HISTORY: u32 = 100;

#[derive(Clone)]
pub struct ScoreLedger {
    db: FirestoreDb,
    events: EventBus,
}

impl ScoreLedger {
    pub fn new(db: FirestoreDb, events: EventBus) -> Self {
        Self { db, events }
    }

    /// Append a score record and notify subscribers of the new total.
    pub async fn record_score(&self, score: NewScore) -> Result<ScoreRecord> {
        score.validate()?;

        let source = score
            .source
            .ok_or_else(|| AppError::Validation("source is required".to_string()))?;
        let points = u32::try_from(score.points)
            .map_err(|_| AppError::Validation("points out of range".to_string()))?;

        let record = ScoreRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: score.user_id,
            points,
            source,
            challenge_ref: score.challenge_ref.filter(|c| !c.is_empty()),
            created_at: crate::time_utils::now_rfc3339(),
        };

        self.db.insert_score_record(&record).await?;

        // The record is durable from here on: the notification goes out
        // even if the running total cannot be read. Subscribers re-read the
        // ledger, so a lower bound is enough to carry the change.
        let new_total = match self
            .events
            .retry_policy()
            .run("total after score", || {
                self.db.total_points_for(&record.user_id)
            })
            .await
        {
            Ok(total) => total,
            Err(e) => {
                tracing::error!(
                    user_id = %record.user_id,
                    record_id = %record.id,
                    error = %e,
                    "Failed to compute total after recording score; publishing lower bound"
                );
                u64::from(record.points)
            }
        };

        tracing::info!(
            user_id = %record.user_id,
            record_id = %record.id,
            points = record.points,
            source = %record.source,
            new_total,
            "Score recorded"
        );

        self.events
            .publish(DomainEvent::ScoreChanged {
                user_id: record.user_id.clone(),
                new_total,
                points_delta: record.points,
                source: record.source,
            })
            .await;

        Ok(record)
    }

    /// Sum of all points recorded for a user (0 if none).
    pub async fn total_points_for(&self, user_id: &str) -> Result<u64> {
        self.db.total_points_for(user_id).await
    }

    /// Most recent records for a user, newest first.
    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<ScoreRecord>> {
        let limit = limit.clamp(1, MAX_HISTORY);
        self.db.list_score_records(user_id, Some(limit)).await
    }
}
