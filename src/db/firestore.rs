// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Profiles (display-name read model)
//! - Score records (append-only ledger)
//! - Rank tiers (seed reference data)
//! - Competitive standings
//! - Leaderboard entries
//!
//! The same operations are served from an in-memory store when no
//! Firestore project is configured.

use std::sync::Arc;

use firestore::paths;

use crate::db::collections;
use crate::db::memory::MemoryStore;
use crate::error::AppError;
use crate::models::{
    CompetitiveStanding, LeaderboardEntry, Profile, RankTier, RankTierRecord, ScoreRecord,
};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

#[derive(Clone)]
enum Backend {
    Firestore(firestore::FirestoreDb),
    Memory(Arc<MemoryStore>),
}

/// Document store client.
#[derive(Clone)]
pub struct FirestoreDb {
    backend: Backend,
    /// Operations that fail a set number of times (test builds only).
    #[cfg(test)]
    injected_failures: Arc<dashmap::DashMap<&'static str, u32>>,
}

/// Document IDs may not contain `/`, so user IDs are URL-encoded.
fn doc_id(user_id: &str) -> String {
    urlencoding::encode(user_id).into_owned()
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self::with_backend(Backend::Firestore(client)))
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self::with_backend(Backend::Firestore(client)))
    }

    /// Create a client backed by process memory (offline mode).
    pub fn new_in_memory() -> Self {
        Self::with_backend(Backend::Memory(Arc::new(MemoryStore::default())))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            #[cfg(test)]
            injected_failures: Arc::new(dashmap::DashMap::new()),
        }
    }

    /// Make the next `times` calls of `op` fail (test builds only).
    #[cfg(test)]
    pub fn fail_next(&self, op: &'static str, times: u32) {
        self.injected_failures.insert(op, times);
    }

    #[cfg(test)]
    fn injected_failure(&self, op: &'static str) -> Result<(), AppError> {
        if let Some(mut remaining) = self.injected_failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Database(format!("Injected failure: {}", op)));
            }
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn injected_failure(&self, _op: &'static str) -> Result<(), AppError> {
        Ok(())
    }

    // ─── Profile Operations ──────────────────────────────────────

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.get_profile(user_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::PROFILES)
                .obj()
                .one(&doc_id(user_id))
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Create or update a profile.
    pub async fn upsert_profile(&self, profile: &Profile) -> Result<(), AppError> {
        match &self.backend {
            Backend::Memory(mem) => {
                mem.upsert_profile(profile);
                Ok(())
            }
            Backend::Firestore(client) => {
                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collections::PROFILES)
                    .document_id(doc_id(&profile.user_id))
                    .object(profile)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
        }
    }

    // ─── Score Record Operations ─────────────────────────────────

    /// Append a score record. Records are never updated afterwards.
    pub async fn insert_score_record(&self, record: &ScoreRecord) -> Result<(), AppError> {
        self.injected_failure("insert_score_record")?;
        match &self.backend {
            Backend::Memory(mem) => {
                mem.insert_score_record(record);
                Ok(())
            }
            Backend::Firestore(client) => {
                let _: () = client
                    .fluent()
                    .insert()
                    .into(collections::SCORE_RECORDS)
                    .document_id(&record.id)
                    .object(record)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Get score records for a user, newest first.
    pub async fn list_score_records(
        &self,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ScoreRecord>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.list_score_records(user_id, limit)),
            Backend::Firestore(client) => {
                let user_id = user_id.to_string();
                let query = client
                    .fluent()
                    .select()
                    .from(collections::SCORE_RECORDS)
                    .filter(move |q| q.field("user_id").eq(user_id.clone()))
                    .order_by([(
                        "created_at",
                        firestore::FirestoreQueryDirection::Descending,
                    )]);

                let query = match limit {
                    Some(limit) => query.limit(limit),
                    None => query,
                };

                query
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))
            }
        }
    }

    /// Sum of all points recorded for a user (0 if none).
    pub async fn total_points_for(&self, user_id: &str) -> Result<u64, AppError> {
        self.injected_failure("total_points_for")?;
        let records = self.list_score_records(user_id, None).await?;
        Ok(records.iter().map(|r| u64::from(r.points)).sum())
    }

    // ─── Rank Tier Operations ────────────────────────────────────

    pub async fn list_rank_tiers(&self) -> Result<Vec<RankTierRecord>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.list_rank_tiers()),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::RANK_TIERS)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Insert a tier threshold unless one already exists for that tier.
    ///
    /// Returns `true` if the record was written.
    pub async fn insert_rank_tier_if_absent(
        &self,
        record: &RankTierRecord,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.insert_rank_tier_if_absent(record)),
            Backend::Firestore(client) => {
                let result: Result<(), _> = client
                    .fluent()
                    .insert()
                    .into(collections::RANK_TIERS)
                    .document_id(record.name.as_str())
                    .object(record)
                    .execute()
                    .await;
                created_or_conflict(result)
            }
        }
    }

    // ─── Competitive Standing Operations ─────────────────────────

    pub async fn get_standing(
        &self,
        user_id: &str,
    ) -> Result<Option<CompetitiveStanding>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.get_standing(user_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::COMPETITIVE_STANDINGS)
                .obj()
                .one(&doc_id(user_id))
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Create a standing unless one already exists.
    ///
    /// Returns `true` if this call created it.
    pub async fn create_standing_if_absent(
        &self,
        standing: &CompetitiveStanding,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.create_standing_if_absent(standing)),
            Backend::Firestore(client) => {
                let result: Result<(), _> = client
                    .fluent()
                    .insert()
                    .into(collections::COMPETITIVE_STANDINGS)
                    .document_id(doc_id(&standing.user_id))
                    .object(standing)
                    .execute()
                    .await;
                created_or_conflict(result)
            }
        }
    }

    /// Read-modify-write a standing atomically.
    ///
    /// `f` receives the current standing (if any) and returns the new one.
    /// On Firestore the write is committed in a transaction so concurrent
    /// writers of the same standing are retried rather than lost.
    pub async fn update_standing<F>(
        &self,
        user_id: &str,
        f: F,
    ) -> Result<CompetitiveStanding, AppError>
    where
        F: FnOnce(Option<CompetitiveStanding>) -> CompetitiveStanding,
    {
        self.injected_failure("update_standing")?;
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.update_standing(user_id, f)),
            Backend::Firestore(client) => {
                let id = doc_id(user_id);

                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;

                // Reading through the transaction registers the document for
                // conflict detection; a conflicting commit fails and the
                // caller's retry policy re-runs the whole update.
                let reader = client.clone_with_consistency_selector(
                    firestore::FirestoreConsistencySelector::Transaction(
                        transaction.transaction_id().clone(),
                    ),
                );
                let current: Option<CompetitiveStanding> = reader
                    .fluent()
                    .select()
                    .by_id_in(collections::COMPETITIVE_STANDINGS)
                    .obj()
                    .one(&id)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to read standing in transaction: {}",
                            e
                        ))
                    })?;

                let next = f(current);

                client
                    .fluent()
                    .update()
                    .in_col(collections::COMPETITIVE_STANDINGS)
                    .document_id(&id)
                    .object(&next)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add standing to transaction: {}",
                            e
                        ))
                    })?;

                transaction.commit().await.map_err(|e| {
                    AppError::Database(format!("Transaction commit failed: {}", e))
                })?;

                Ok(next)
            }
        }
    }

    /// Standings currently holding `tier`, highest points first.
    pub async fn list_standings_by_tier(
        &self,
        tier: RankTier,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<CompetitiveStanding>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.list_standings_by_tier(tier, limit, offset)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::COMPETITIVE_STANDINGS)
                .filter(move |q| q.field("tier").eq(tier.as_str()))
                .order_by([
                    (
                        "total_points",
                        firestore::FirestoreQueryDirection::Descending,
                    ),
                    ("user_id", firestore::FirestoreQueryDirection::Ascending),
                ])
                .limit(limit)
                .offset(offset)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    // ─── Leaderboard Entry Operations ────────────────────────────

    pub async fn get_entry(&self, user_id: &str) -> Result<Option<LeaderboardEntry>, AppError> {
        self.injected_failure("get_entry")?;
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.get_entry(user_id)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .by_id_in(collections::LEADERBOARD_ENTRIES)
                .obj()
                .one(&doc_id(user_id))
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    /// Create an entry unless one already exists for the user.
    ///
    /// Returns `true` if this call created it.
    pub async fn create_entry_if_absent(&self, entry: &LeaderboardEntry) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.create_entry_if_absent(entry)),
            Backend::Firestore(client) => {
                let result: Result<(), _> = client
                    .fluent()
                    .insert()
                    .into(collections::LEADERBOARD_ENTRIES)
                    .document_id(doc_id(&entry.user_id))
                    .object(entry)
                    .execute()
                    .await;
                created_or_conflict(result)
            }
        }
    }

    /// Read-modify-write an existing entry's points atomically.
    ///
    /// `f` receives the stored entry and returns the updated one; only
    /// `total_points` and `updated_at` are written back. Returns the entry
    /// before and after the update, or `None` if the user has no entry.
    pub async fn update_entry<F>(
        &self,
        user_id: &str,
        f: F,
    ) -> Result<Option<(LeaderboardEntry, LeaderboardEntry)>, AppError>
    where
        F: FnOnce(&LeaderboardEntry) -> LeaderboardEntry,
    {
        self.injected_failure("update_entry")?;
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.update_entry(user_id, f)),
            Backend::Firestore(client) => {
                let id = doc_id(user_id);

                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::Database(format!("Failed to begin transaction: {}", e))
                })?;

                let reader = client.clone_with_consistency_selector(
                    firestore::FirestoreConsistencySelector::Transaction(
                        transaction.transaction_id().clone(),
                    ),
                );
                let current: Option<LeaderboardEntry> = reader
                    .fluent()
                    .select()
                    .by_id_in(collections::LEADERBOARD_ENTRIES)
                    .obj()
                    .one(&id)
                    .await
                    .map_err(|e| {
                        AppError::Database(format!("Failed to read entry in transaction: {}", e))
                    })?;

                let Some(before) = current else {
                    transaction.rollback().await.map_err(|e| {
                        AppError::Database(format!("Transaction rollback failed: {}", e))
                    })?;
                    return Ok(None);
                };

                let next = f(&before);

                client
                    .fluent()
                    .update()
                    .fields(paths!(LeaderboardEntry::{total_points, updated_at}))
                    .in_col(collections::LEADERBOARD_ENTRIES)
                    .document_id(&id)
                    .object(&next)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!("Failed to add entry to transaction: {}", e))
                    })?;

                transaction.commit().await.map_err(|e| {
                    AppError::Database(format!("Transaction commit failed: {}", e))
                })?;

                Ok(Some((before, next)))
            }
        }
    }

    /// Number of entries that rank strictly ahead of `entry`.
    ///
    /// Entries with more points are counted server-side; only the tied
    /// bucket is fetched, since Firestore cannot express the
    /// (created_at, user_id) comparison in one filter.
    pub async fn count_entries_outranking(&self, entry: &LeaderboardEntry) -> Result<u64, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.count_entries_outranking(entry)),
            Backend::Firestore(client) => {
                let points = entry.total_points;

                let higher: Vec<CountResult> = client
                    .fluent()
                    .select()
                    .from(collections::LEADERBOARD_ENTRIES)
                    .filter(move |q| q.field("total_points").greater_than(points))
                    .aggregate(|a| a.fields([a.field("count").count()]))
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                let tied: Vec<LeaderboardEntry> = client
                    .fluent()
                    .select()
                    .from(collections::LEADERBOARD_ENTRIES)
                    .filter(move |q| q.field("total_points").eq(points))
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                let tied_ahead = tied.iter().filter(|t| entry.is_outranked_by(t)).count();

                Ok(single_count(higher) + tied_ahead as u64)
            }
        }
    }

    /// All entries in leaderboard order.
    pub async fn list_entries_ranked(&self) -> Result<Vec<LeaderboardEntry>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.list_entries_ranked()),
            Backend::Firestore(client) => {
                let mut entries: Vec<LeaderboardEntry> = client
                    .fluent()
                    .select()
                    .from(collections::LEADERBOARD_ENTRIES)
                    .order_by([
                        (
                            "total_points",
                            firestore::FirestoreQueryDirection::Descending,
                        ),
                        ("created_at", firestore::FirestoreQueryDirection::Ascending),
                    ])
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                // Final user_id tie-break is not expressible in the query.
                entries.sort_by(|a, b| a.rank_cmp(b));
                Ok(entries)
            }
        }
    }

    /// Write new positions for many entries.
    ///
    /// Only `position` and `updated_at` are written so a concurrent points
    /// update is not overwritten. Writes are committed in batches.
    pub async fn set_entry_positions(&self, entries: &[LeaderboardEntry]) -> Result<(), AppError> {
        match &self.backend {
            Backend::Memory(mem) => {
                for entry in entries {
                    mem.set_entry_position(&entry.user_id, entry.position, &entry.updated_at);
                }
                Ok(())
            }
            Backend::Firestore(client) => {
                for chunk in entries.chunks(BATCH_SIZE) {
                    let mut transaction = client.begin_transaction().await.map_err(|e| {
                        AppError::Database(format!("Failed to begin transaction: {}", e))
                    })?;

                    for entry in chunk {
                        client
                            .fluent()
                            .update()
                            .fields(paths!(LeaderboardEntry::{position, updated_at}))
                            .in_col(collections::LEADERBOARD_ENTRIES)
                            .document_id(doc_id(&entry.user_id))
                            .object(entry)
                            .add_to_transaction(&mut transaction)
                            .map_err(|e| {
                                AppError::Database(format!(
                                    "Failed to add position update to transaction: {}",
                                    e
                                ))
                            })?;
                    }

                    transaction.commit().await.map_err(|e| {
                        AppError::Database(format!("Failed to commit position batch: {}", e))
                    })?;
                }
                Ok(())
            }
        }
    }

    /// A page of entries ordered by stored position.
    pub async fn list_entries_page(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.list_entries_page(limit, offset)),
            Backend::Firestore(client) => client
                .fluent()
                .select()
                .from(collections::LEADERBOARD_ENTRIES)
                .order_by([
                    ("position", firestore::FirestoreQueryDirection::Ascending),
                    (
                        "total_points",
                        firestore::FirestoreQueryDirection::Descending,
                    ),
                ])
                .limit(limit)
                .offset(offset)
                .obj()
                .query()
                .await
                .map_err(|e| AppError::Database(e.to_string())),
        }
    }

    pub async fn count_entries(&self) -> Result<u64, AppError> {
        match &self.backend {
            Backend::Memory(mem) => Ok(mem.count_entries()),
            Backend::Firestore(client) => {
                let counts: Vec<CountResult> = client
                    .fluent()
                    .select()
                    .from(collections::LEADERBOARD_ENTRIES)
                    .aggregate(|a| a.fields([a.field("count").count()]))
                    .obj()
                    .query()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                Ok(single_count(counts))
            }
        }
    }
}

/// Row returned by a `count()` aggregation aliased as `count`.
#[derive(Debug, serde::Deserialize)]
struct CountResult {
    count: u64,
}

/// An aggregation over an empty collection may return no row at all.
fn single_count(rows: Vec<CountResult>) -> u64 {
    rows.first().map(|row| row.count).unwrap_or(0)
}

/// Map the outcome of a create-only write: `Ok(true)` if created,
/// `Ok(false)` if the document already existed.
fn created_or_conflict(
    result: Result<(), firestore::errors::FirestoreError>,
) -> Result<bool, AppError> {
    match result {
        Ok(()) => Ok(true),
        Err(firestore::errors::FirestoreError::DataConflictError(_)) => Ok(false),
        Err(e) => Err(AppError::Database(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_escapes_slashes() {
        assert_eq!(doc_id("plain-id"), "plain-id");
        assert_eq!(doc_id("team/alice"), "team%2Falice");
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let db = FirestoreDb::new_in_memory();
        db.fail_next("total_points_for", 1);

        assert!(db.total_points_for("u").await.is_err());
        assert_eq!(db.total_points_for("u").await.unwrap(), 0);
    }
}
