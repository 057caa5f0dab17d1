/// JWT Token Generation and Validation
///
/// Access tokens are HS256 JWTs. The codec holds a small key ring: the
/// current secret signs, and retired secrets keep verifying until they are
/// removed from configuration. Each key is addressed by a `kid` derived
/// from its secret.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Reasons an access token is not honoured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Outside `[nbf, exp]`
    Expired,
    /// Signature, key id or algorithm did not match
    BadSignature,
    /// Not a decodable JWT with the expected claims
    Malformed,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Expired => write!(f, "token outside its validity window"),
            CodecError::BadSignature => write!(f, "token signature invalid"),
            CodecError::Malformed => write!(f, "token malformed"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Expired => AuthError::Expired,
            CodecError::BadSignature => AuthError::BadSignature,
            CodecError::Malformed => AuthError::Malformed,
        }
    }
}

struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    fn from_secret(secret: &str) -> Self {
        Self {
            kid: key_id(secret),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Short fingerprint of a secret, safe to publish in token headers
fn key_id(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Signs and verifies access tokens
pub struct TokenCodec {
    /// First key signs; all keys verify
    keys: Vec<SigningKey>,
    issuer: String,
}

impl TokenCodec {
    /// Build the key ring from settings
    ///
    /// # Errors
    /// Returns a config error if the settings fail validation
    pub fn new(config: &JwtSettings) -> Result<Self, AppError> {
        config.validate()?;

        let keys = std::iter::once(&config.secret)
            .chain(config.previous_secrets.iter())
            .map(|secret| SigningKey::from_secret(secret))
            .collect();

        Ok(Self {
            keys,
            issuer: config.issuer.clone(),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign claims with the current key
    pub fn issue(&self, claims: &Claims) -> Result<String, AppError> {
        let key = &self.keys[0];
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(key.kid.clone());

        encode(&header, claims, &key.encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature and validity window against the current time
    pub fn verify(&self, token: &str) -> Result<Claims, CodecError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature, then check `now` against `nbf` and `exp`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, CodecError> {
        let claims = self.verify_signature(token)?;

        if !claims.is_valid_at(now) {
            return Err(CodecError::Expired);
        }

        Ok(claims)
    }

    /// Verify signature and issuer only
    ///
    /// Used where an expired token must still identify its pair, as in
    /// revocation.
    pub fn verify_signature(&self, token: &str) -> Result<Claims, CodecError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!("JWT header decode error: {}", e);
            CodecError::Malformed
        })?;

        if header.alg != Algorithm::HS256 {
            return Err(CodecError::BadSignature);
        }

        match header.kid.as_deref() {
            Some(kid) => {
                let key = self
                    .keys
                    .iter()
                    .find(|key| key.kid == kid)
                    .ok_or(CodecError::BadSignature)?;
                self.decode_with(token, key)
            }
            // Tokens without a kid are tried against every key
            None => {
                let mut last = CodecError::BadSignature;
                for key in &self.keys {
                    match self.decode_with(token, key) {
                        Ok(claims) => return Ok(claims),
                        Err(e) => last = e,
                    }
                }
                Err(last)
            }
        }
    }

    fn decode_with(&self, token: &str, key: &SigningKey) -> Result<Claims, CodecError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time is checked by the caller against an explicit instant
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &key.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                match e.kind() {
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        CodecError::BadSignature
                    }
                    _ => CodecError::Malformed,
                }
            })
    }
}
