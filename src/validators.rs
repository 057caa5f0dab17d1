/// Input validators for token-carrying requests
///
/// Token strings and client context come straight from untrusted clients,
/// so they are checked for shape and length before anything looks them up.

use regex::Regex;
use lazy_static::lazy_static;

use crate::error::ValidationError;

/// Longest client context persisted with a refresh record
pub const MAX_CLIENT_CONTEXT_LENGTH: usize = 225;
/// Longest token accepted on any endpoint
pub const MAX_TOKEN_LENGTH: usize = 4096;

lazy_static! {
    // <pair id as 32 hex digits>.<48 alphanumeric secret>
    static ref REFRESH_TOKEN_REGEX: Regex =
        Regex::new(r"^[0-9a-f]{32}\.[A-Za-z0-9]{48}$").unwrap();

    // Three base64url segments; the signature may not be empty
    static ref ACCESS_TOKEN_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$").unwrap();
}

/// True when `token` has the shape of an issued refresh token
pub fn is_valid_refresh_token(token: &str) -> bool {
    REFRESH_TOKEN_REGEX.is_match(token)
}

/// True when `token` has the shape of a compact JWT
pub fn is_valid_access_token(token: &str) -> bool {
    token.len() <= MAX_TOKEN_LENGTH && ACCESS_TOKEN_REGEX.is_match(token)
}

/// Validates a token field from a request body
/// - Rejects empty and oversized values
/// - Returns the trimmed token
pub fn validate_token_field(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }

    if trimmed.len() > MAX_TOKEN_LENGTH {
        return Err(ValidationError::TooLong(field.to_string(), MAX_TOKEN_LENGTH));
    }

    Ok(trimmed.to_string())
}

/// Client context captured at issuance (usually the User-Agent header)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientContext(String);

impl ClientContext {
    /// Build from a raw header value
    /// - Drops control characters
    /// - Truncates to `MAX_CLIENT_CONTEXT_LENGTH` characters
    pub fn new(raw: &str) -> Self {
        let sanitized: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_CLIENT_CONTEXT_LENGTH)
            .collect();
        Self(sanitized)
    }

    pub fn from_request(req: &actix_web::HttpRequest) -> Self {
        req.headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
