/// Refresh Token Format
///
/// A refresh token is `<pair_id>.<secret>`:
/// - `pair_id` is the random v4 UUID (simple form) shared with the access token's `jti`
/// - `secret` is 48 cryptographically random alphanumeric characters
///
/// The server stores only a bcrypt hash of the secret, so the plaintext
/// token is visible exactly once, when it is issued.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::validators::is_valid_refresh_token;

pub const SECRET_LENGTH: usize = 48;

/// Identifier linking an access token to its refresh record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(pub Uuid);

impl PairId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Generate a new refresh secret
pub fn generate_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// A refresh token split into its parts
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub pair_id: PairId,
    pub secret: String,
}

impl RefreshToken {
    pub fn new(pair_id: PairId, secret: String) -> Self {
        Self { pair_id, secret }
    }

    /// Parse the wire form
    ///
    /// # Errors
    /// Returns `Malformed` for anything other than `<32 hex>.<48 alphanumeric>`
    pub fn parse(token: &str) -> Result<Self, AuthError> {
        let token = token.trim();
        if !is_valid_refresh_token(token) {
            return Err(AuthError::Malformed);
        }

        let (pair_id, secret) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let pair_id = PairId::parse(pair_id).ok_or(AuthError::Malformed)?;

        Ok(Self {
            pair_id,
            secret: secret.to_string(),
        })
    }
}

impl fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pair_id, self.secret)
    }
}

// Keep secrets out of logs
impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("pair_id", &self.pair_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();

        assert_eq!(secret.len(), SECRET_LENGTH);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_parse_issued_token() {
        let token = RefreshToken::new(PairId::new(), generate_secret());
        let parsed = RefreshToken::parse(&token.to_string()).expect("Failed to parse token");

        assert_eq!(parsed, token);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let pair_id = PairId::new();
        let cases = vec![
            String::new(),
            "no-dot-here".to_string(),
            format!("{}.", pair_id),
            format!("{}.short", pair_id),
            format!("not-a-uuid.{}", generate_secret()),
            format!("{}.{}!", pair_id, &generate_secret()[1..]),
            format!("{}.{}.extra", pair_id, generate_secret()),
        ];

        for case in cases {
            assert_eq!(
                RefreshToken::parse(&case),
                Err(AuthError::Malformed),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = RefreshToken::new(PairId::new(), generate_secret());
        let debug = format!("{:?}", token);

        assert!(!debug.contains(&token.secret));
        assert!(debug.contains("redacted"));
    }
}
