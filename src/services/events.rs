// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Domain notifications and the bus that carries them.
//!
//! Producers publish fire-and-forget. Each (event, subscriber) pair becomes
//! its own envelope so that one slow or failing consumer never blocks the
//! others. Delivery is at-least-once; every handler is an idempotent upsert.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::ScoreSource;
use crate::services::tasks::TasksService;

/// Something that happened in one subdomain that others react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// The Profile Registry created a profile.
    ProfileCreated {
        user_id: String,
        display_name: String,
    },
    /// The Profile Registry changed a profile.
    ProfileUpdated {
        user_id: String,
        display_name: String,
    },
    /// The score ledger persisted a new record.
    ScoreChanged {
        user_id: String,
        new_total: u64,
        points_delta: u32,
        source: ScoreSource,
    },
    /// A competitive standing was bootstrapped.
    CompetitiveProfileCreated { user_id: String, total_points: u64 },
    /// The leaderboard computed a position for a user.
    LeaderboardPositionChanged {
        user_id: String,
        position: u32,
        total_points: u64,
    },
}

impl DomainEvent {
    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::ProfileCreated { user_id, .. }
            | DomainEvent::ProfileUpdated { user_id, .. }
            | DomainEvent::ScoreChanged { user_id, .. }
            | DomainEvent::CompetitiveProfileCreated { user_id, .. }
            | DomainEvent::LeaderboardPositionChanged { user_id, .. } => user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ProfileCreated { .. } => "profile_created",
            DomainEvent::ProfileUpdated { .. } => "profile_updated",
            DomainEvent::ScoreChanged { .. } => "score_changed",
            DomainEvent::CompetitiveProfileCreated { .. } => "competitive_profile_created",
            DomainEvent::LeaderboardPositionChanged { .. } => "leaderboard_position_changed",
        }
    }

    /// Consumers of this event, one delivery each.
    pub fn subscribers(&self) -> &'static [Subscriber] {
        match self {
            DomainEvent::ProfileCreated { .. } => {
                &[Subscriber::ProfileDirectory, Subscriber::CompetitiveProfile]
            }
            DomainEvent::ProfileUpdated { .. } => &[Subscriber::ProfileDirectory],
            DomainEvent::ScoreChanged { .. } => {
                &[Subscriber::Leaderboard, Subscriber::CompetitiveProfile]
            }
            DomainEvent::CompetitiveProfileCreated { .. } => &[Subscriber::Leaderboard],
            DomainEvent::LeaderboardPositionChanged { .. } => &[Subscriber::CompetitiveProfile],
        }
    }
}

/// Component that consumes an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscriber {
    ProfileDirectory,
    CompetitiveProfile,
    Leaderboard,
}

/// One delivery of one event to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Shared by all deliveries of the same event (log correlation)
    pub event_id: uuid::Uuid,
    pub subscriber: Subscriber,
    pub event: DomainEvent,
    pub emitted_at: String,
}

/// Fixed-backoff retry policy: one attempt plus `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.event_max_retries,
            backoff: config.event_retry_backoff,
        }
    }

    /// Run `op` until it succeeds or the retries are exhausted.
    ///
    /// Returns the last error after the final attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                // Bad input will not get better on retry.
                Err(e @ AppError::Validation(_)) => return Err(e),
                Err(e) if attempt > self.max_retries => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        what,
                        attempt,
                        max_attempts = self.max_retries + 1,
                        error = %e,
                        "Attempt failed, retrying after backoff"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[derive(Clone)]
enum Transport {
    Local(mpsc::UnboundedSender<EventEnvelope>),
    CloudTasks(std::sync::Arc<TasksService>),
}

/// Publishing side of the notification fabric.
#[derive(Clone)]
pub struct EventBus {
    transport: Transport,
    retry: RetryPolicy,
    /// Target URL for Cloud Tasks deliveries
    service_url: String,
}

impl EventBus {
    /// Bus backed by an in-process channel. The receiver feeds an
    /// `EventDispatcher`.
    pub fn local(retry: RetryPolicy) -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Self {
            transport: Transport::Local(tx),
            retry,
            service_url: String::new(),
        };
        (bus, rx)
    }

    /// Bus that enqueues one Cloud Task per delivery.
    pub fn cloud_tasks(tasks: TasksService, retry: RetryPolicy, service_url: &str) -> Self {
        Self {
            transport: Transport::CloudTasks(std::sync::Arc::new(tasks)),
            retry,
            service_url: service_url.to_string(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Publish an event to all of its subscribers.
    ///
    /// Never fails the caller: the producing write has already committed, so
    /// hand-off failures are logged as delivery errors and dropped.
    pub async fn publish(&self, event: DomainEvent) {
        let event_id = uuid::Uuid::new_v4();
        let emitted_at = crate::time_utils::now_rfc3339();

        for &subscriber in event.subscribers() {
            let envelope = EventEnvelope {
                event_id,
                subscriber,
                event: event.clone(),
                emitted_at: emitted_at.clone(),
            };

            if let Err(e) = self.hand_off(envelope).await {
                tracing::error!(
                    event_id = %event_id,
                    event = event.kind(),
                    user_id = event.user_id(),
                    subscriber = ?subscriber,
                    error = %e,
                    "Event delivery failed; producing write is kept"
                );
            }
        }
    }

    async fn hand_off(&self, envelope: EventEnvelope) -> Result<()> {
        match &self.transport {
            Transport::Local(tx) => tx.send(envelope).map_err(|e| {
                AppError::Delivery(format!("local dispatcher is gone: {}", e.0.event.kind()))
            }),
            Transport::CloudTasks(tasks) => self
                .retry
                .run("enqueue event task", || {
                    tasks.queue_event(&self.service_url, &envelope)
                })
                .await
                .map_err(|e| AppError::Delivery(e.to_string())),
        }
    }
}
