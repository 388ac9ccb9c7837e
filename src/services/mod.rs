// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod choreography;
pub mod competitive;
pub mod events;
pub mod google_oidc;
pub mod leaderboard;
pub mod ledger;
pub mod profiles;
pub mod ranks;
pub mod tasks;

pub use choreography::EventDispatcher;
pub use competitive::{CompetitiveSynchronizer, TierProgress};
pub use events::{DomainEvent, EventBus, EventEnvelope, RetryPolicy, Subscriber};
pub use google_oidc::{TaskPrincipal, TaskTokenVerifier, TokenError};
pub use leaderboard::LeaderboardRanker;
pub use ledger::ScoreLedger;
pub use profiles::ProfileDirectory;
pub use ranks::TierLadder;
pub use tasks::TasksService;
