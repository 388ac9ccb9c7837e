// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Rank-Tracker: competitive ranking back office
//!
//! This crate keeps an append-only score ledger, classifies users into rank
//! tiers, maintains a global leaderboard, and keeps each user's competitive
//! standing in sync through an event choreography layer.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::FirestoreDb;
use services::{
    CompetitiveSynchronizer, EventBus, EventDispatcher, LeaderboardRanker, ProfileDirectory,
    RetryPolicy, ScoreLedger, TaskTokenVerifier, TierLadder,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub ladder: Arc<TierLadder>,
    pub ledger: ScoreLedger,
    pub ranker: LeaderboardRanker,
    pub competitive: CompetitiveSynchronizer,
    pub profiles: ProfileDirectory,
    pub events: EventBus,
    /// Checks the OIDC token on Cloud Tasks deliveries
    pub task_tokens: Arc<TaskTokenVerifier>,
}

impl AppState {
    /// Wire every component to one store and one bus.
    pub fn new(
        config: Config,
        db: FirestoreDb,
        ladder: TierLadder,
        events: EventBus,
        task_tokens: TaskTokenVerifier,
    ) -> Self {
        let ladder = Arc::new(ladder);
        let ledger = ScoreLedger::new(db.clone(), events.clone());
        let ranker = LeaderboardRanker::new(db.clone(), events.clone());
        let competitive = CompetitiveSynchronizer::new(
            db.clone(),
            ledger.clone(),
            ladder.clone(),
            events.clone(),
            config.elite_position_cutoff,
        );
        let profiles = ProfileDirectory::new(db.clone(), config.profile_registry_url.clone());

        Self {
            config,
            db,
            ladder,
            ledger,
            ranker,
            competitive,
            profiles,
            events,
            task_tokens: Arc::new(task_tokens),
        }
    }

    /// State over an in-memory store with a local bus.
    ///
    /// The returned dispatcher is not running; call `spawn` or drive it
    /// with `step`/`drain`.
    pub async fn in_memory(
        config: Config,
    ) -> Result<(Arc<Self>, EventDispatcher), error::AppError> {
        let task_tokens = TaskTokenVerifier::new(&config)?;
        Self::in_memory_with_verifier(config, task_tokens).await
    }

    /// Like `in_memory`, with a caller-supplied task token verifier.
    pub async fn in_memory_with_verifier(
        config: Config,
        task_tokens: TaskTokenVerifier,
    ) -> Result<(Arc<Self>, EventDispatcher), error::AppError> {
        let db = FirestoreDb::new_in_memory();
        let ladder = TierLadder::load_or_seed(&db).await?;
        let (events, rx) = EventBus::local(RetryPolicy::from_config(&config));

        let state = Arc::new(Self::new(config, db, ladder, events, task_tokens));
        let dispatcher = EventDispatcher::new(state.clone(), rx);
        Ok((state, dispatcher))
    }
}
