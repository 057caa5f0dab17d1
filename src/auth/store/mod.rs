/// Refresh Record Storage
///
/// One record per outstanding token pair. Records hold only a hash of the
/// refresh secret. Redemption through `take` is destructive and atomic, so a
/// refresh token can be redeemed at most once even when the same token is
/// presented by concurrent requests.

mod memory;
mod postgres;

pub use memory::InMemoryTokenStore;
pub use postgres::PgTokenStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::refresh_token::PairId;
use crate::error::{AppError, DatabaseError};
use crate::identity::Identity;
use crate::validators::ClientContext;

/// Persisted state of one token pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub pair_id: PairId,
    pub identity: Identity,
    pub secret_hash: String,
    pub client_context: String,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshRecord {
    /// Check `now` against the record's redemption window
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if now < self.not_before {
            return Err(StoreError::NotYetValid);
        }
        if now > self.expires_at {
            return Err(StoreError::Expired);
        }
        Ok(())
    }
}

/// Secret and identifier handed back once, at creation
pub struct IssuedRefresh {
    pub pair_id: PairId,
    pub secret: String,
}

/// Storage failures
#[derive(Debug)]
pub enum StoreError {
    NotFound,
    SecretMismatch,
    /// Past the record's expiry
    Expired,
    /// Before the record's not-before time
    NotYetValid,
    Backend(AppError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "refresh record not found"),
            StoreError::SecretMismatch => write!(f, "refresh secret does not match"),
            StoreError::Expired => write!(f, "refresh record expired"),
            StoreError::NotYetValid => write!(f, "refresh record not yet valid"),
            StoreError::Backend(e) => write!(f, "store backend failure: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<AppError> for StoreError {
    fn from(err: AppError) -> Self {
        StoreError::Backend(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(AppError::from(err))
    }
}

impl StoreError {
    /// Convert a failure that cannot stem from client input
    pub fn into_internal(self) -> AppError {
        match self {
            StoreError::Backend(e) => e,
            other => AppError::Database(DatabaseError::UnexpectedError(other.to_string())),
        }
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new record and return its identifier and raw secret
    async fn create(
        &self,
        identity: Identity,
        client_context: &ClientContext,
        not_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedRefresh, StoreError>;

    /// Look up and verify a record without consuming it
    async fn redeem(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError>;

    /// Verify a record and consume it
    ///
    /// Of any number of concurrent callers presenting the same token, at
    /// most one gets `Ok`; the rest see `NotFound`. Nothing is deleted on
    /// `SecretMismatch` or `NotYetValid`. An expired record is deleted.
    async fn take(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError>;

    /// Remove a record; absence is not an error
    async fn delete(&self, pair_id: PairId) -> Result<(), StoreError>;

    /// Remove every record of an identity, returning the removed pair ids
    async fn delete_all_for_identity(&self, identity: Identity) -> Result<Vec<PairId>, StoreError>;

    /// Remove records past their expiry
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Truncate to whole seconds, the precision records are stored with
pub(crate) fn to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}
