/// Identity collaborator
///
/// The account store lives outside this service. Sessions only need the
/// durable identity an account authenticates as, and a way to resolve it
/// from the identifiers clients know about.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Durable identity used for authorization decisions
///
/// Carried in the `sub` claim of access tokens. Never shown to other users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub Uuid);

impl Identity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public identifier shown in profiles and URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicId(pub Uuid);

/// Lookups the session layer needs from the account store
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve_by_public_id(&self, public_id: PublicId) -> Result<Option<Identity>, AppError>;

    async fn resolve_by_name(&self, name: &str) -> Result<Option<Identity>, AppError>;

    /// Remove the account; refresh records for it must go too
    async fn delete_account(&self, identity: Identity) -> Result<(), AppError>;
}

/// Account store backed by the `users` table
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn resolve_by_public_id(&self, public_id: PublicId) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_scalar::<_, Uuid>(
            "SELECT auth_uuid FROM users WHERE public_uuid = $1",
        )
        .bind(public_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity.map(Identity))
    }

    async fn resolve_by_name(&self, name: &str) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_scalar::<_, Uuid>(
            "SELECT auth_uuid FROM users WHERE username = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity.map(Identity))
    }

    async fn delete_account(&self, identity: Identity) -> Result<(), AppError> {
        // refresh_tokens.identity cascades on delete
        let result = sqlx::query("DELETE FROM users WHERE auth_uuid = $1")
            .bind(identity.0)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            identity = %identity,
            deleted = result.rows_affected(),
            "Account deleted"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    public_id: PublicId,
    name: String,
}

/// Process-local account store for tests and single-node demos
#[derive(Default)]
pub struct InMemoryIdentityDirectory {
    accounts: RwLock<HashMap<Identity, Account>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account and return its (identity, public id)
    pub fn register(&self, name: &str) -> (Identity, PublicId) {
        let account = Account {
            identity: Identity::new(),
            public_id: PublicId(Uuid::new_v4()),
            name: name.to_string(),
        };
        let ids = (account.identity, account.public_id);

        self.accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(account.identity, account);
        ids
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&identity)
    }

    fn find(&self, predicate: impl Fn(&Account) -> bool) -> Option<Identity> {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .find(|account| predicate(account))
            .map(|account| account.identity)
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn resolve_by_public_id(&self, public_id: PublicId) -> Result<Option<Identity>, AppError> {
        Ok(self.find(|account| account.public_id == public_id))
    }

    async fn resolve_by_name(&self, name: &str) -> Result<Option<Identity>, AppError> {
        Ok(self.find(|account| account.name == name))
    }

    async fn delete_account(&self, identity: Identity) -> Result<(), AppError> {
        self.accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&identity);
        Ok(())
    }
}
