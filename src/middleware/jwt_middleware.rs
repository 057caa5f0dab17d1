/// Authorization Middleware
///
/// Reads the bearer token from the Authorization header, validates it
/// through the session manager (signature, window, blacklist) and attaches
/// a `Caller` to the request extensions for the extractors in `caller`.
///
/// Two variants:
/// - `required`: any missing or failing token ends the request with 401
/// - `optional`: a missing or failing token continues as `Caller::Anonymous`
///
/// In both, a storage failure while checking the blacklist is a 500. There
/// is no degraded mode that lets a token through unchecked.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::SessionManager;
use crate::error::{AppError, AuthError};
use crate::middleware::caller::Caller;
use crate::validators::is_valid_access_token;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Required,
    Optional,
}

/// Middleware attaching the request's `Caller`
pub struct AuthMiddleware {
    sessions: SessionManager,
    mode: Mode,
}

impl AuthMiddleware {
    /// Reject requests without a valid access token
    pub fn required(sessions: SessionManager) -> Self {
        Self {
            sessions,
            mode: Mode::Required,
        }
    }

    /// Let every request through, authenticated or not
    pub fn optional(sessions: SessionManager) -> Self {
        Self {
            sessions,
            mode: Mode::Optional,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            sessions: self.sessions.clone(),
            mode: self.mode,
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    sessions: SessionManager,
    mode: Mode,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let sessions = self.sessions.clone();
        let mode = self.mode;

        let token = match bearer_token(&req) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(path = %req.path(), "Malformed Authorization header");
                return Box::pin(async move { Err(AppError::from(e).into()) });
            }
        };

        Box::pin(async move {
            let caller = match (token, mode) {
                (None, Mode::Required) => {
                    tracing::warn!(path = %req.path(), "Missing Authorization header");
                    return Err(AppError::from(AuthError::MissingToken).into());
                }
                (None, Mode::Optional) => Caller::Anonymous,
                (Some(token), mode) => match sessions.validate_access_token(&token).await {
                    Ok(claims) => {
                        tracing::debug!(identity = %claims.sub, pair_id = %claims.jti, "Access token validated");
                        Caller::Authenticated(claims)
                    }
                    Err(AppError::Auth(e)) if mode == Mode::Optional => {
                        tracing::debug!(error = %e, "Continuing anonymously after token rejection");
                        Caller::Anonymous
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            req.extensions_mut().insert(caller);
            service.call(req).await
        })
    }
}

/// Pull the bearer token out of the Authorization header
///
/// `Ok(None)` when the header is absent; `Malformed` when it is present
/// but is not `Bearer <compact JWT>`.
fn bearer_token(req: &ServiceRequest) -> Result<Option<String>, AuthError> {
    let Some(value) = req.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| AuthError::Malformed)?;
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .ok_or(AuthError::Malformed)?;

    if !is_valid_access_token(token) {
        return Err(AuthError::Malformed);
    }

    Ok(Some(token.to_string()))
}
