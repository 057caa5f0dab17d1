/// JWT Claims structure
///
/// Payload of an access token: who the caller is, which token pair the
/// token belongs to, and the window in which it may be used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::refresh_token::PairId;
use crate::error::AuthError;
use crate::identity::Identity;

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (durable identity as UUID string)
    pub sub: String,
    /// Token pair identifier shared with the refresh record
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Create claims valid from `issued_at` for `expiry_seconds`
    pub fn new(
        identity: Identity,
        pair_id: PairId,
        issued_at: DateTime<Utc>,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = issued_at.timestamp();
        Self {
            sub: identity.to_string(),
            jti: pair_id.to_string(),
            iat: now,
            nbf: now,
            exp: now + expiry_seconds,
            iss: issuer,
        }
    }

    /// Extract the durable identity
    ///
    /// # Errors
    /// Returns `Malformed` if the subject is not a valid UUID
    pub fn identity(&self) -> Result<Identity, AuthError> {
        Identity::parse(&self.sub).ok_or(AuthError::Malformed)
    }

    /// Extract the token pair identifier
    pub fn pair_id(&self) -> Result<PairId, AuthError> {
        PairId::parse(&self.jti).ok_or(AuthError::Malformed)
    }

    /// True when `at` falls inside `[nbf, exp]`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let at = at.timestamp();
        self.nbf <= at && at <= self.exp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_claims_creation() {
        let identity = Identity::new();
        let pair_id = PairId::new();
        let now = Utc::now();
        let claims = Claims::new(identity, pair_id, now, 3600, "test".to_string());

        assert_eq!(claims.sub, identity.to_string());
        assert_eq!(claims.jti, pair_id.to_string());
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.is_valid_at(now));
    }

    #[test]
    fn test_identity_and_pair_extraction() {
        let identity = Identity::new();
        let pair_id = PairId::new();
        let claims = Claims::new(identity, pair_id, Utc::now(), 3600, "test".to_string());

        assert_eq!(claims.identity().unwrap(), identity);
        assert_eq!(claims.pair_id().unwrap(), pair_id);
    }

    #[test]
    fn test_invalid_subject() {
        let mut claims = Claims::new(Identity::new(), PairId::new(), Utc::now(), 3600, "test".to_string());
        claims.sub = "invalid-uuid".to_string();

        assert_eq!(claims.identity(), Err(AuthError::Malformed));
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        let claims = Claims::new(Identity::new(), PairId::new(), now, 60, "test".to_string());

        assert!(!claims.is_valid_at(now - Duration::seconds(5)));
        assert!(claims.is_valid_at(now + Duration::seconds(60)));
        assert!(!claims.is_valid_at(now + Duration::seconds(61)));
    }
}
