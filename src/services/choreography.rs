// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Event routing between subdomains.
//!
//! Per-user lifecycle:
//! 1. `profile_created` bootstraps a standing (NonExistent → Bootstrapped)
//! 2. `competitive_profile_created` creates the leaderboard entry
//! 3. `score_changed` updates the entry and the standing (→ Synced)
//! 4. `leaderboard_position_changed` applies the elite override
//!
//! Any step may arrive late, early, or twice. Every handler is an upsert,
//! so redelivery and reordering converge on the same state.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::services::events::{DomainEvent, EventEnvelope, Subscriber};
use crate::AppState;

/// Run one subscriber's handler for one event.
pub async fn dispatch(state: &AppState, envelope: &EventEnvelope) -> Result<()> {
    match (envelope.subscriber, &envelope.event) {
        (
            Subscriber::ProfileDirectory,
            DomainEvent::ProfileCreated {
                user_id,
                display_name,
            }
            | DomainEvent::ProfileUpdated {
                user_id,
                display_name,
            },
        ) => state.profiles.record(user_id, display_name).await,

        (Subscriber::CompetitiveProfile, DomainEvent::ProfileCreated { user_id, .. }) => {
            state.competitive.bootstrap(user_id).await.map(|_| ())
        }

        (
            Subscriber::CompetitiveProfile,
            DomainEvent::ScoreChanged {
                user_id, new_total, ..
            },
        ) => {
            let total = ledger_total(state, user_id, *new_total).await?;
            state
                .competitive
                .sync_from_score(user_id, total)
                .await
                .map(|_| ())
        }

        (
            Subscriber::CompetitiveProfile,
            DomainEvent::LeaderboardPositionChanged {
                user_id, position, ..
            },
        ) => state
            .competitive
            .apply_position_override(user_id, *position)
            .await
            .map(|_| ()),

        (
            Subscriber::Leaderboard,
            DomainEvent::CompetitiveProfileCreated {
                user_id,
                total_points,
            },
        ) => state
            .ranker
            .ensure_entry(user_id, *total_points)
            .await
            .map(|_| ()),

        (
            Subscriber::Leaderboard,
            DomainEvent::ScoreChanged {
                user_id, new_total, ..
            },
        ) => {
            let total = ledger_total(state, user_id, *new_total).await?;
            state.ranker.upsert(user_id, total).await.map(|_| ())
        }

        (subscriber, event) => {
            tracing::warn!(
                event_id = %envelope.event_id,
                event = event.kind(),
                subscriber = ?subscriber,
                "No handler for delivery; dropping"
            );
            Ok(())
        }
    }
}

/// The user's total as the ledger has it now.
///
/// `score_changed` carries the producer's view of the total, which may be a
/// lower bound or already outdated; the ledger is the source of truth.
async fn ledger_total(state: &AppState, user_id: &str, reported: u64) -> Result<u64> {
    let total = state.ledger.total_points_for(user_id).await?;
    if total != reported {
        tracing::debug!(user_id, reported, total, "Using ledger total for score change");
    }
    Ok(total)
}

/// Dispatch with the bus retry policy; exhausted retries become a
/// `Delivery` error, logged here.
pub async fn deliver(state: &AppState, envelope: &EventEnvelope) -> Result<()> {
    let result = state
        .events
        .retry_policy()
        .run(envelope.event.kind(), || dispatch(state, envelope))
        .await;

    match result {
        Ok(()) => {
            tracing::debug!(
                event_id = %envelope.event_id,
                event = envelope.event.kind(),
                subscriber = ?envelope.subscriber,
                user_id = envelope.event.user_id(),
                "Event delivered"
            );
            Ok(())
        }
        Err(e) => Err(exhausted(envelope, e)),
    }
}

/// Log a delivery that will not be attempted again and wrap its last
/// handler error as a `Delivery` error.
pub fn exhausted(envelope: &EventEnvelope, e: AppError) -> AppError {
    tracing::error!(
        event_id = %envelope.event_id,
        event = envelope.event.kind(),
        subscriber = ?envelope.subscriber,
        user_id = envelope.event.user_id(),
        error = %e,
        "Event delivery failed after retries"
    );
    AppError::Delivery(format!(
        "{} to {:?} for {}: {}",
        envelope.event.kind(),
        envelope.subscriber,
        envelope.event.user_id(),
        e
    ))
}

/// Consumer side of the in-process bus.
pub struct EventDispatcher {
    state: Arc<AppState>,
    rx: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventDispatcher {
    pub fn new(state: Arc<AppState>, rx: mpsc::UnboundedReceiver<EventEnvelope>) -> Self {
        Self { state, rx }
    }

    /// Deliver envelopes until every sender is gone, one task per delivery.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = self.rx.recv().await {
                let state = self.state.clone();
                tokio::spawn(async move {
                    // Failures are logged by `deliver`.
                    let _ = deliver(&state, &envelope).await;
                });
            }
            tracing::info!("Event dispatcher stopped");
        })
    }

    /// Deliver the oldest pending envelope inline.
    ///
    /// Returns `None` when nothing is queued.
    pub async fn step(&mut self) -> Option<(EventEnvelope, Result<()>)> {
        let envelope = self.rx.try_recv().ok()?;
        let result = deliver(&self.state, &envelope).await;
        Some((envelope, result))
    }

    /// Deliver inline until the queue is empty, including deliveries that
    /// handlers publish along the way. Returns the number delivered.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while self.step().await.is_some() {
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{NewScore, RankTier, ScoreSource};

    async fn app() -> (Arc<AppState>, EventDispatcher) {
        AppState::in_memory(Config::test_default()).await.unwrap()
    }

    fn score(user: &str, points: i64) -> NewScore {
        NewScore {
            user_id: user.to_string(),
            points,
            source: Some(ScoreSource::ChallengeCompleted),
            challenge_ref: None,
        }
    }

    async fn profile_created(state: &AppState, user: &str) {
        state
            .events
            .publish(DomainEvent::ProfileCreated {
                user_id: user.to_string(),
                display_name: format!("Player {}", user),
            })
            .await;
    }

    #[tokio::test]
    async fn test_first_score_walkthrough() {
        let (state, mut dispatcher) = app().await;

        profile_created(&state, "u1").await;
        dispatcher.drain().await;

        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 0);
        assert_eq!(standing.tier, RankTier::Bronze);
        let entry = state.ranker.position_of("u1").await.unwrap().unwrap();
        assert_eq!(entry.position, 1);

        state.ledger.record_score(score("u1", 600)).await.unwrap();

        // Leaderboard upsert first; it queues the position update.
        let (envelope, result) = dispatcher.step().await.unwrap();
        assert_eq!(envelope.subscriber, Subscriber::Leaderboard);
        result.unwrap();
        let entry = state.ranker.position_of("u1").await.unwrap().unwrap();
        assert_eq!((entry.total_points, entry.position), (600, 1));

        // Score sync classifies by points alone.
        let (envelope, result) = dispatcher.step().await.unwrap();
        assert_eq!(envelope.subscriber, Subscriber::CompetitiveProfile);
        result.unwrap();
        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 600);
        assert_eq!(standing.tier, RankTier::Silver);

        // Position 1 is inside the elite cutoff.
        dispatcher.drain().await;
        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.leaderboard_position, Some(1));
        assert_eq!(standing.tier, RankTier::ELITE);
        assert_eq!(standing.total_points, 600);

        assert_eq!(
            state.profiles.display_name("u1").await.as_deref(),
            Some("Player u1")
        );
    }

    #[tokio::test]
    async fn test_duplicate_profile_created_is_absorbed() {
        let (state, mut dispatcher) = app().await;

        profile_created(&state, "u1").await;
        profile_created(&state, "u1").await;

        // 2 × (directory + bootstrap), then exactly one leaderboard creation.
        assert_eq!(dispatcher.drain().await, 5);
        assert_eq!(state.ranker.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_score_before_profile_converges() {
        let (state, mut dispatcher) = app().await;

        state.ledger.record_score(score("u1", 1_600)).await.unwrap();
        dispatcher.drain().await;
        profile_created(&state, "u1").await;
        dispatcher.drain().await;

        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 1_600);
        let entry = state.ranker.position_of("u1").await.unwrap().unwrap();
        assert_eq!(entry.total_points, 1_600);
        assert_eq!(state.ranker.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redelivered_score_change_is_idempotent() {
        let (state, mut dispatcher) = app().await;

        state.ledger.record_score(score("a", 900)).await.unwrap();
        state.ledger.record_score(score("b", 300)).await.unwrap();
        dispatcher.drain().await;

        let stale = DomainEvent::ScoreChanged {
            user_id: "b".to_string(),
            new_total: 300,
            points_delta: 300,
            source: ScoreSource::ChallengeCompleted,
        };
        state.events.publish(stale.clone()).await;
        state.events.publish(stale).await;
        dispatcher.drain().await;

        let entry = state.ranker.position_of("b").await.unwrap().unwrap();
        assert_eq!((entry.total_points, entry.position), (300, 2));
        let standing = state.competitive.standing("b").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 300);
    }

    #[tokio::test]
    async fn test_transient_handler_failure_is_retried() {
        let (state, mut dispatcher) = app().await;
        state.db.fail_next("update_standing", 2);

        state.ledger.record_score(score("u1", 600)).await.unwrap();
        dispatcher.drain().await;

        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 600);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_delivery_error() {
        let (state, mut dispatcher) = app().await;
        // One attempt plus three retries.
        state.db.fail_next("update_standing", 4);

        state.ledger.record_score(score("u1", 600)).await.unwrap();

        let mut failures = vec![];
        while let Some((envelope, result)) = dispatcher.step().await {
            if let Err(e) = result {
                failures.push((envelope.subscriber, e));
            }
        }

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Subscriber::CompetitiveProfile);
        assert!(matches!(failures[0].1, AppError::Delivery(_)));

        // The ledger write and the leaderboard are unaffected.
        assert_eq!(state.ledger.total_points_for("u1").await.unwrap(), 600);
        assert!(state.ranker.position_of("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_score_converges_when_total_lookup_fails() {
        let (state, mut dispatcher) = app().await;

        state.ledger.record_score(score("u1", 600)).await.unwrap();
        dispatcher.drain().await;

        // The producer cannot read the total at all for the second score.
        state.db.fail_next("total_points_for", 4);
        state.ledger.record_score(score("u1", 150)).await.unwrap();
        dispatcher.drain().await;

        let entry = state.ranker.position_of("u1").await.unwrap().unwrap();
        assert_eq!(entry.total_points, 750);
        let standing = state.competitive.standing("u1").await.unwrap().unwrap();
        assert_eq!(standing.total_points, 750);
    }

    #[tokio::test]
    async fn test_elite_cutoff_at_five_hundred() {
        let (state, mut dispatcher) = app().await;

        // Lowest first, so each newcomer briefly claims first place.
        for i in (1..=501u32).rev() {
            let user = format!("user-{:03}", i);
            let points = 10 * (600 - i64::from(i));
            state.ledger.record_score(score(&user, points)).await.unwrap();
        }
        dispatcher.drain().await;

        let summary = state.ranker.recalculate_all().await.unwrap();
        assert_eq!(summary.total_entries, 501);
        dispatcher.drain().await;

        let last_elite = state.competitive.standing("user-500").await.unwrap().unwrap();
        assert_eq!(last_elite.leaderboard_position, Some(500));
        assert_eq!(last_elite.tier, RankTier::ELITE);

        let first_outside = state.competitive.standing("user-501").await.unwrap().unwrap();
        assert_eq!(first_outside.leaderboard_position, Some(501));
        assert_eq!(first_outside.total_points, 990);
        assert_eq!(first_outside.tier, RankTier::Silver);

        let top = state.competitive.standing("user-001").await.unwrap().unwrap();
        assert_eq!(top.leaderboard_position, Some(1));
        assert_eq!(top.tier, RankTier::ELITE);
    }
}
