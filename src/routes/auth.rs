/// Session Routes
///
/// Token refresh, revocation and the caller-facing session endpoints.
/// Pairs are first issued by whatever authenticates the account, through
/// `SessionManager::issue_pair`; nothing here accepts a password.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::auth::SessionManager;
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};
use crate::identity::IdentityDirectory;
use crate::middleware::{Authenticated, Caller};
use crate::validators::{validate_token_field, ClientContext};

/// Token refresh request
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Revocation request; either token alone is enough
#[derive(Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Caller status for optionally authenticated clients
#[derive(Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// Details of the presented access token
#[derive(Serialize)]
pub struct WhoAmIResponse {
    pub identity: String,
    pub pair_id: String,
    pub expires_at: Option<String>,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

/// POST /auth/refresh
///
/// Redeem a refresh token for a new pair. The old refresh token is
/// consumed whether or not the client receives the response.
///
/// # Errors
/// - 400: Body missing or `refresh_token` empty
/// - 401: Token malformed, unknown, expired or already redeemed
/// - 500: Storage failure
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");
    let refresh_token = validate_token_field("refresh_token", &form.refresh_token)?;
    let client_context = ClientContext::from_request(&req);

    match sessions.refresh(&refresh_token, client_context).await {
        Ok(pair) => {
            tracing::info!(request_id = %context.request_id, "Token refreshed");
            Ok(HttpResponse::Ok().json(pair))
        }
        Err(e) => {
            context.log_error(&e);
            Err(e)
        }
    }
}

/// POST /auth/revoke
///
/// Blacklist the pairs behind the given tokens. Succeeds for tokens that
/// have already expired or were revoked before. A refresh token only counts
/// if its secret matches.
///
/// # Errors
/// - 400: Neither token identifies a pair
/// - 500: Storage failure
pub async fn revoke(
    form: web::Json<RevokeRequest>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let access_token = optional_token("access_token", form.access_token.as_deref())?;
    let refresh_token = optional_token("refresh_token", form.refresh_token.as_deref())?;

    revoke_pair(&sessions, access_token.as_deref(), refresh_token.as_deref()).await
}

/// DELETE /auth/blacklist/{access_token}/{refresh_token}
///
/// Path form of `revoke` for clients that cannot send a body.
pub async fn revoke_path(
    path: web::Path<(String, String)>,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let (access_token, refresh_token) = path.into_inner();
    revoke_pair(&sessions, Some(&access_token), Some(&refresh_token)).await
}

async fn revoke_pair(
    sessions: &SessionManager,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_revoke");

    match sessions.revoke(access_token, refresh_token).await {
        Ok(()) => Ok(HttpResponse::Ok().finish()),
        // An unidentifiable pair is a bad request, not a failed login
        Err(AppError::Auth(AuthError::Malformed)) => {
            let e = AppError::from(ValidationError::InvalidFormat("token pair".to_string()));
            context.log_error(&e);
            Err(e)
        }
        Err(e) => {
            context.log_error(&e);
            Err(e)
        }
    }
}

fn optional_token(field: &str, value: Option<&str>) -> Result<Option<String>, AppError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(Some(validate_token_field(field, value)?)),
        _ => Ok(None),
    }
}

/// GET /auth/status
///
/// Works with or without a token; a rejected token reads as anonymous.
pub async fn status(caller: Caller) -> HttpResponse {
    let identity = caller.claims().map(|claims| claims.sub.clone());

    HttpResponse::Ok().json(StatusResponse {
        authenticated: caller.is_authenticated(),
        identity,
    })
}

/// GET /api/whoami
pub async fn whoami(caller: Authenticated) -> HttpResponse {
    HttpResponse::Ok().json(WhoAmIResponse {
        identity: caller.identity.to_string(),
        pair_id: caller.pair_id.to_string(),
        expires_at: caller
            .claims
            .expires_at()
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    })
}

/// POST /api/logout-all
///
/// Revoke every pair of the caller, the current one included.
pub async fn logout_all(
    caller: Authenticated,
    sessions: web::Data<SessionManager>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("logout_all").with_identity(caller.identity);

    let revoked = sessions
        .revoke_all_sessions(caller.identity)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    Ok(HttpResponse::Ok().json(LogoutAllResponse { revoked }))
}

/// DELETE /api/account
///
/// Revoke all sessions, then hand the account to the identity directory
/// for deletion.
///
/// # Errors
/// - 401: Caller not authenticated
/// - 500: Revocation or deletion failed
pub async fn delete_account(
    caller: Authenticated,
    sessions: web::Data<SessionManager>,
    directory: web::Data<dyn IdentityDirectory>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("delete_account").with_identity(caller.identity);

    let revoked = match sessions.revoke_all_sessions(caller.identity).await {
        Ok(revoked) => revoked,
        Err(e) => {
            context.log_error(&e);
            return Err(e);
        }
    };

    if let Err(e) = directory.delete_account(caller.identity).await {
        context.log_error(&e);
        return Err(e);
    }

    tracing::info!(
        request_id = %context.request_id,
        identity = %caller.identity,
        revoked = revoked,
        "Account deleted"
    );
    Ok(HttpResponse::Accepted().finish())
}

/// Reject unparsable JSON bodies with 400 instead of actix's plain text
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(16 * 1024)
        .error_handler(|err, _req| {
            AppError::from(ValidationError::MalformedBody(err.to_string())).into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_token() {
        assert_eq!(optional_token("access_token", None).unwrap(), None);
        assert_eq!(optional_token("access_token", Some("  ")).unwrap(), None);
        assert_eq!(
            optional_token("access_token", Some(" a.b.c ")).unwrap(),
            Some("a.b.c".to_string())
        );
        assert!(optional_token("access_token", Some(&"x".repeat(5000))).is_err());
    }
}
