/// Token Pair Blacklist
///
/// Revoked pair identifiers, consulted on every access token validation.
/// A token can verify cryptographically and still be refused here.
///
/// Entries live in process memory. With persistence enabled every new
/// entry is also written to `token_blacklist` in the background, and the
/// table is read back at startup. A write that is lost in a crash means the
/// revoked pair is forgotten after restart, and its access token is honoured
/// again until its own `exp`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::refresh_token::PairId;
use crate::auth::store::StoreError;

#[async_trait]
pub trait Blacklist: Send + Sync {
    /// Refuse the pair until `expires_at`; adding twice is harmless
    async fn add(&self, pair_id: PairId, expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn contains(&self, pair_id: PairId) -> Result<bool, StoreError>;

    /// Drop entries whose pair can no longer be used anyway
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Blacklist held in a lock-protected map
#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: RwLock<HashMap<PairId, DateTime<Utc>>>,
    persistence: Option<PgPool>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write entries to `token_blacklist`
    pub fn with_persistence(pool: PgPool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            persistence: Some(pool),
        }
    }

    /// Load unexpired entries written by earlier processes
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let Some(pool) = &self.persistence else {
            return Ok(0);
        };

        let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            "SELECT pair_id, expires_at FROM token_blacklist WHERE expires_at >= $1",
        )
        .bind(Utc::now())
        .fetch_all(pool)
        .await?;

        let count = rows.len();
        let mut entries = self.write();
        for (pair_id, expires_at) in rows {
            entries.insert(PairId(pair_id), expires_at);
        }

        tracing::info!(count = count, "Blacklist restored");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PairId, DateTime<Utc>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PairId, DateTime<Utc>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, pair_id: PairId, expires_at: DateTime<Utc>) {
        let Some(pool) = self.persistence.clone() else {
            return;
        };

        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO token_blacklist (pair_id, expires_at)
                VALUES ($1, $2)
                ON CONFLICT (pair_id) DO UPDATE
                SET expires_at = GREATEST(token_blacklist.expires_at, EXCLUDED.expires_at)
                "#,
            )
            .bind(pair_id.0)
            .bind(expires_at)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::error!(pair_id = %pair_id, error = %e, "Failed to persist blacklist entry");
            }
        });
    }

    async fn purge_persisted(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(pool) = &self.persistence {
            sqlx::query("DELETE FROM token_blacklist WHERE expires_at < $1")
                .bind(now)
                .execute(pool)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Blacklist for InMemoryBlacklist {
    async fn add(&self, pair_id: PairId, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        {
            let mut entries = self.write();
            let entry = entries.entry(pair_id).or_insert(expires_at);
            if *entry < expires_at {
                *entry = expires_at;
            }
        }

        self.persist(pair_id, expires_at);
        Ok(())
    }

    async fn contains(&self, pair_id: PairId) -> Result<bool, StoreError> {
        Ok(self.read().contains_key(&pair_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let removed = {
            let mut entries = self.write();
            let before = entries.len();
            entries.retain(|_, expires_at| *expires_at >= now);
            before - entries.len()
        };

        self.purge_persisted(now).await?;
        Ok(removed as u64)
    }
}
