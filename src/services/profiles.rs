// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Display-name read model fed by Profile Registry notifications.
//!
//! Lookups go cache → `profiles` collection → registry (if configured).
//! Names are cosmetic: a failed lookup yields no name rather than an error.

use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::FirestoreDb;
use crate::error::{AppError, Result};
use crate::models::Profile;

const MAX_CONCURRENT_LOOKUPS: usize = 50;

#[derive(Debug, Deserialize)]
struct RegistryProfile {
    display_name: String,
}

/// HTTP client for the Profile Registry.
#[derive(Clone)]
struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    async fn fetch_display_name(&self, user_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/profiles/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(user_id)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Profile registry error: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(anyhow::anyhow!(
                "Profile registry HTTP {}: {}",
                status,
                body
            )));
        }

        let profile: RegistryProfile = response.json().await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Profile registry JSON parse error: {}", e))
        })?;

        Ok(Some(profile.display_name))
    }
}

#[derive(Clone)]
pub struct ProfileDirectory {
    db: FirestoreDb,
    cache: Arc<DashMap<String, String>>,
    registry: Option<RegistryClient>,
}

impl ProfileDirectory {
    pub fn new(db: FirestoreDb, registry_url: Option<String>) -> Self {
        Self {
            db,
            cache: Arc::new(DashMap::new()),
            registry: registry_url.map(|base_url| RegistryClient {
                http: reqwest::Client::new(),
                base_url,
            }),
        }
    }

    /// Store a display name reported by the registry.
    pub async fn record(&self, user_id: &str, display_name: &str) -> Result<()> {
        let now = crate::time_utils::now_rfc3339();
        let created_at = self
            .db
            .get_profile(user_id)
            .await?
            .map(|p| p.created_at)
            .unwrap_or_else(|| now.clone());

        self.db
            .upsert_profile(&Profile {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                created_at,
                updated_at: now,
            })
            .await?;

        self.cache
            .insert(user_id.to_string(), display_name.to_string());

        tracing::debug!(user_id, display_name, "Profile display name recorded");
        Ok(())
    }

    /// Resolve a display name, or `None` if no source knows the user.
    pub async fn display_name(&self, user_id: &str) -> Option<String> {
        if let Some(name) = self.cache.get(user_id) {
            return Some(name.clone());
        }

        match self.db.get_profile(user_id).await {
            Ok(Some(profile)) => {
                self.cache
                    .insert(user_id.to_string(), profile.display_name.clone());
                return Some(profile.display_name);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Profile lookup failed");
                return None;
            }
        }

        let registry = self.registry.as_ref()?;
        match registry.fetch_display_name(user_id).await {
            Ok(Some(name)) => {
                if let Err(e) = self.record(user_id, &name).await {
                    tracing::warn!(user_id, error = %e, "Failed to store registry profile");
                }
                Some(name)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Profile registry lookup failed");
                None
            }
        }
    }

    /// Resolve names for many users concurrently. Unknown users are omitted.
    pub async fn display_names(&self, user_ids: &[String]) -> HashMap<String, String> {
        stream::iter(user_ids.iter().cloned())
            .map(|user_id| async move {
                let name = self.display_name(&user_id).await;
                (user_id, name)
            })
            .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
            .filter_map(|(user_id, name)| async move { name.map(|n| (user_id, n)) })
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorded_name_survives_cold_cache() {
        let db = FirestoreDb::new_in_memory();
        let directory = ProfileDirectory::new(db.clone(), None);
        directory.record("u1", "Ada").await.unwrap();
        assert_eq!(directory.display_name("u1").await.as_deref(), Some("Ada"));

        // A fresh directory over the same store falls back to the collection.
        let cold = ProfileDirectory::new(db, None);
        assert_eq!(cold.display_name("u1").await.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_rename_keeps_creation_time() {
        let db = FirestoreDb::new_in_memory();
        let directory = ProfileDirectory::new(db.clone(), None);

        directory.record("u1", "Ada").await.unwrap();
        let created = db.get_profile("u1").await.unwrap().unwrap().created_at;

        directory.record("u1", "Ada L.").await.unwrap();
        let profile = db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.created_at, created);
        assert_eq!(profile.display_name, "Ada L.");
        assert_eq!(directory.display_name("u1").await.as_deref(), Some("Ada L."));
    }

    #[tokio::test]
    async fn test_unreachable_registry_yields_no_name() {
        let directory = ProfileDirectory::new(
            FirestoreDb::new_in_memory(),
            Some("http://127.0.0.1:9".to_string()),
        );
        assert_eq!(directory.display_name("ghost").await, None);
    }

    #[tokio::test]
    async fn test_display_names_omits_unknown_users() {
        let directory = ProfileDirectory::new(FirestoreDb::new_in_memory(), None);
        directory.record("a", "Ada").await.unwrap();
        directory.record("b", "Bob").await.unwrap();

        let names = directory
            .display_names(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await;

        assert_eq!(names.len(), 2);
        assert_eq!(names["a"], "Ada");
        assert_eq!(names["b"], "Bob");
    }
}
