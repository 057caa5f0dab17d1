use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{to_seconds, IssuedRefresh, RefreshRecord, StoreError, TokenStore};
use crate::auth::hasher::CredentialHasher;
use crate::auth::refresh_token::{generate_secret, PairId};
use crate::error::AppError;
use crate::identity::Identity;
use crate::validators::ClientContext;

const RECORD_COLUMNS: &str =
    "pair_id, identity, secret_hash, client_context, not_before, expires_at, created_at";

/// Row of the `refresh_tokens` table
#[derive(sqlx::FromRow)]
struct RefreshRow {
    pair_id: Uuid,
    identity: Uuid,
    secret_hash: Vec<u8>,
    client_context: String,
    not_before: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RefreshRow> for RefreshRecord {
    type Error = StoreError;

    fn try_from(row: RefreshRow) -> Result<Self, Self::Error> {
        let secret_hash = String::from_utf8(row.secret_hash).map_err(|_| {
            StoreError::Backend(AppError::Internal(
                "Stored secret hash is not valid UTF-8".to_string(),
            ))
        })?;

        Ok(Self {
            pair_id: PairId(row.pair_id),
            identity: Identity(row.identity),
            secret_hash,
            client_context: row.client_context,
            not_before: row.not_before,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

/// Refresh records in PostgreSQL
///
/// `take` reads and verifies the record without holding a lock, then
/// consumes it with a single `DELETE ... RETURNING`. Only one concurrent
/// `take` gets the row back; the others see `NotFound`. On a secret
/// mismatch nothing is deleted.
pub struct PgTokenStore {
    pool: PgPool,
    hasher: CredentialHasher,
}

impl PgTokenStore {
    pub fn new(pool: PgPool, hasher: CredentialHasher) -> Self {
        Self { pool, hasher }
    }

    async fn fetch(&self, pair_id: PairId) -> Result<RefreshRecord, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {} FROM refresh_tokens WHERE pair_id = $1",
            RECORD_COLUMNS
        ))
        .bind(pair_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        RefreshRecord::try_from(row)
    }

    async fn verify(&self, record: &RefreshRecord, secret: &str) -> Result<(), StoreError> {
        if self.hasher.verify_async(secret, &record.secret_hash).await? {
            Ok(())
        } else {
            Err(StoreError::SecretMismatch)
        }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(
        &self,
        identity: Identity,
        client_context: &ClientContext,
        not_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedRefresh, StoreError> {
        let pair_id = PairId::new();
        let secret = generate_secret();
        let secret_hash = self.hasher.hash(&secret)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (pair_id, identity, secret_hash, client_context, not_before, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(pair_id.0)
        .bind(identity.0)
        .bind(secret_hash.as_bytes())
        .bind(client_context.as_str())
        .bind(to_seconds(not_before))
        .bind(to_seconds(expires_at))
        .bind(to_seconds(Utc::now()))
        .execute(&self.pool)
        .await?;

        tracing::debug!(pair_id = %pair_id, identity = %identity, "Refresh record created");
        Ok(IssuedRefresh { pair_id, secret })
    }

    async fn redeem(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError> {
        let record = self.fetch(pair_id).await?;
        self.verify(&record, secret).await?;
        record.check_window(now)?;
        Ok(record)
    }

    async fn take(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError> {
        let record = self.fetch(pair_id).await?;
        self.verify(&record, secret).await?;

        let window = record.check_window(now);
        if let Err(StoreError::NotYetValid) = window {
            return Err(StoreError::NotYetValid);
        }

        // Expired rows are deleted too; the winner is whoever gets the row back
        let row = sqlx::query_as::<_, RefreshRow>(&format!(
            "DELETE FROM refresh_tokens WHERE pair_id = $1 RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(pair_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let removed = RefreshRecord::try_from(row)?;
        window.map(|()| removed)
    }

    async fn delete(&self, pair_id: PairId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM refresh_tokens WHERE pair_id = $1")
            .bind(pair_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_for_identity(&self, identity: Identity) -> Result<Vec<PairId>, StoreError> {
        let removed = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM refresh_tokens WHERE identity = $1 RETURNING pair_id",
        )
        .bind(identity.0)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(identity = %identity, count = removed.len(), "Refresh records removed for identity");
        Ok(removed.into_iter().map(PairId).collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
