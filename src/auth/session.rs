/// Session Manager
///
/// Owns the lifecycle of a token pair:
///
/// ```text
/// Issued -> { Active <-> Stale } -> Redeemed | Revoked | Expired
/// ```
///
/// `Active` while the access token is inside its window, `Stale` once it
/// has expired but the refresh token is still redeemable. Redemption always
/// mints a new pair identifier; nothing ever returns to `Issued`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::auth::blacklist::Blacklist;
use crate::auth::claims::Claims;
use crate::auth::jwt::TokenCodec;
use crate::auth::refresh_token::{PairId, RefreshToken};
use crate::auth::store::{StoreError, TokenStore};
use crate::configuration::{JwtSettings, SessionSettings};
use crate::error::{AppError, AuthError};
use crate::identity::Identity;
use crate::validators::ClientContext;

/// Freshly issued credentials
#[derive(Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Issues, validates, rotates and revokes token pairs
///
/// Cheap to clone; all state sits behind `Arc`s.
#[derive(Clone)]
pub struct SessionManager {
    codec: Arc<TokenCodec>,
    store: Arc<dyn TokenStore>,
    blacklist: Arc<dyn Blacklist>,
    access_ttl: i64,
    refresh_ttl: i64,
    policy: SessionSettings,
}

impl SessionManager {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn TokenStore>,
        blacklist: Arc<dyn Blacklist>,
        jwt: &JwtSettings,
        policy: SessionSettings,
    ) -> Self {
        Self {
            codec: Arc::new(codec),
            store,
            blacklist,
            access_ttl: jwt.access_token_expiry,
            refresh_ttl: jwt.refresh_token_expiry,
            policy,
        }
    }

    /// Issue a new access/refresh pair for `identity`
    ///
    /// The raw refresh token is only ever visible in the returned pair.
    pub async fn issue_pair(
        &self,
        identity: Identity,
        client_context: &ClientContext,
    ) -> Result<TokenPair, AppError> {
        let now = Utc::now();
        let access_expires_at = now + Duration::seconds(self.access_ttl);
        let not_before = if self.policy.refresh_after_access_expiry {
            access_expires_at
        } else {
            now
        };
        let refresh_expires_at = now + Duration::seconds(self.refresh_ttl);

        let issued = self
            .store
            .create(identity, client_context, not_before, refresh_expires_at)
            .await
            .map_err(StoreError::into_internal)?;

        let claims = Claims::new(
            identity,
            issued.pair_id,
            now,
            self.access_ttl,
            self.codec.issuer().to_string(),
        );

        let access_token = match self.codec.issue(&claims) {
            Ok(token) => token,
            Err(e) => {
                // Do not leave a refresh record without an access token
                if let Err(cleanup) = self.store.delete(issued.pair_id).await {
                    tracing::error!(pair_id = %issued.pair_id, error = %cleanup, "Failed to remove orphaned refresh record");
                }
                return Err(e);
            }
        };

        tracing::info!(identity = %identity, pair_id = %issued.pair_id, "Token pair issued");

        Ok(TokenPair {
            access_token,
            refresh_token: RefreshToken::new(issued.pair_id, issued.secret).to_string(),
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl,
        })
    }

    /// Verify an access token and make sure its pair is not blacklisted
    pub async fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.codec.verify(token).map_err(AuthError::from)?;
        let pair_id = claims.pair_id()?;
        claims.identity()?;

        if self.is_blacklisted(pair_id).await? {
            tracing::warn!(pair_id = %pair_id, "Blacklisted access token presented");
            return Err(AuthError::Revoked.into());
        }

        Ok(claims)
    }

    /// Redeem a refresh token for a new pair
    ///
    /// Runs to completion in its own task even if the caller goes away, so
    /// a consumed record is always followed by its replacement.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_context: ClientContext,
    ) -> Result<TokenPair, AppError> {
        let token = RefreshToken::parse(refresh_token)?;
        let manager = self.clone();

        tokio::spawn(async move { manager.rotate(token, client_context).await })
            .await
            .map_err(|e| AppError::Internal(format!("Refresh task failed: {}", e)))?
    }

    async fn rotate(
        &self,
        token: RefreshToken,
        client_context: ClientContext,
    ) -> Result<TokenPair, AppError> {
        let now = Utc::now();
        let pair_id = token.pair_id;

        if self.policy.bind_client_context {
            let record = match self.store.redeem(pair_id, &token.secret, now).await {
                Ok(record) => record,
                Err(e) => return Err(self.redeem_failure(pair_id, e).await),
            };
            if record.client_context != client_context.as_str() {
                tracing::warn!(
                    pair_id = %pair_id,
                    identity = %record.identity,
                    "Refresh attempted from a different client context"
                );
                return Err(AuthError::Invalid.into());
            }
        }

        let record = match self.store.take(pair_id, &token.secret, now).await {
            Ok(record) => record,
            Err(e) => return Err(self.redeem_failure(pair_id, e).await),
        };

        // A revoke that landed between issuance and this take wins
        if self.is_blacklisted(pair_id).await? {
            tracing::warn!(pair_id = %pair_id, identity = %record.identity, "Refresh token of a revoked pair presented");
            return Err(AuthError::Reused.into());
        }

        if self.policy.blacklist_on_rotation {
            self.blacklist_pair(pair_id).await?;
        }

        let pair = self.issue_pair(record.identity, &client_context).await?;
        tracing::info!(identity = %record.identity, old_pair_id = %pair_id, "Token pair rotated");
        Ok(pair)
    }

    async fn redeem_failure(&self, pair_id: PairId, err: StoreError) -> AppError {
        match err {
            StoreError::NotFound => match self.is_blacklisted(pair_id).await {
                Ok(true) => {
                    tracing::warn!(pair_id = %pair_id, "Redeemed refresh token presented again");
                    AuthError::Reused.into()
                }
                Ok(false) => AuthError::Invalid.into(),
                Err(e) => e,
            },
            StoreError::SecretMismatch => {
                tracing::warn!(pair_id = %pair_id, "Refresh secret mismatch");
                AuthError::Invalid.into()
            }
            StoreError::Expired | StoreError::NotYetValid => AuthError::Expired.into(),
            StoreError::Backend(e) => e,
        }
    }

    /// Blacklist the pairs behind the given tokens and drop their records
    ///
    /// The access token counts when its signature verifies (expiry is
    /// ignored). The refresh token counts when its secret matches the stored
    /// record, or when its pair is already blacklisted so a repeated call
    /// still succeeds. Tokens naming different pairs revoke both. Fails only
    /// if neither token identifies a pair.
    pub async fn revoke(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        let from_access = access_token
            .and_then(|token| self.codec.verify_signature(token).ok())
            .and_then(|claims| claims.pair_id().ok());
        let from_refresh = match refresh_token.and_then(|token| RefreshToken::parse(token).ok()) {
            Some(token) => self.proven_pair(token).await?,
            None => None,
        };

        let pair_ids: Vec<PairId> = match (from_access, from_refresh) {
            (None, None) => return Err(AuthError::Malformed.into()),
            (Some(a), Some(r)) if a != r => {
                tracing::warn!(access_pair = %a, refresh_pair = %r, "Revocation with tokens from different pairs");
                vec![a, r]
            }
            (Some(pair_id), _) | (None, Some(pair_id)) => vec![pair_id],
        };

        let manager = self.clone();
        tokio::spawn(async move {
            for pair_id in pair_ids {
                manager.revoke_pair(pair_id).await?;
            }
            Ok::<(), AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Revoke task failed: {}", e)))?
    }

    /// Pair of a refresh token presented for revocation, if the holder can
    /// prove it
    async fn proven_pair(&self, token: RefreshToken) -> Result<Option<PairId>, AppError> {
        let pair_id = token.pair_id;

        match self.store.redeem(pair_id, &token.secret, Utc::now()).await {
            // The secret is checked before the window
            Ok(_) | Err(StoreError::Expired) | Err(StoreError::NotYetValid) => Ok(Some(pair_id)),
            Err(StoreError::Backend(e)) => Err(e),
            Err(e @ StoreError::NotFound) | Err(e @ StoreError::SecretMismatch) => {
                if self.is_blacklisted(pair_id).await? {
                    return Ok(Some(pair_id));
                }
                tracing::warn!(pair_id = %pair_id, error = %e, "Unproven refresh token presented for revocation");
                Ok(None)
            }
        }
    }

    async fn revoke_pair(&self, pair_id: PairId) -> Result<(), AppError> {
        // Blacklist first so a concurrent refresh of this pair cannot slip through
        self.blacklist_pair(pair_id).await?;
        self.store
            .delete(pair_id)
            .await
            .map_err(StoreError::into_internal)?;

        tracing::info!(pair_id = %pair_id, "Token pair revoked");
        Ok(())
    }

    /// Revoke every outstanding pair of an identity
    ///
    /// Returns the number of pairs revoked.
    pub async fn revoke_all_sessions(&self, identity: Identity) -> Result<usize, AppError> {
        let pair_ids = self
            .store
            .delete_all_for_identity(identity)
            .await
            .map_err(StoreError::into_internal)?;

        for pair_id in &pair_ids {
            self.blacklist_pair(*pair_id).await?;
        }

        tracing::info!(identity = %identity, count = pair_ids.len(), "All sessions revoked");
        Ok(pair_ids.len())
    }

    /// Drop expired refresh records and blacklist entries
    pub async fn purge_expired(&self) -> Result<(u64, u64), AppError> {
        let now = Utc::now();
        let records = self
            .store
            .purge_expired(now)
            .await
            .map_err(StoreError::into_internal)?;
        let entries = self
            .blacklist
            .purge_expired(now)
            .await
            .map_err(StoreError::into_internal)?;
        Ok((records, entries))
    }

    async fn blacklist_pair(&self, pair_id: PairId) -> Result<(), AppError> {
        // No token of the pair outlives the refresh lifetime
        let expires_at: DateTime<Utc> = Utc::now() + Duration::seconds(self.refresh_ttl);
        self.blacklist
            .add(pair_id, expires_at)
            .await
            .map_err(StoreError::into_internal)
    }

    async fn is_blacklisted(&self, pair_id: PairId) -> Result<bool, AppError> {
        self.blacklist
            .contains(pair_id)
            .await
            .map_err(StoreError::into_internal)
    }
}
