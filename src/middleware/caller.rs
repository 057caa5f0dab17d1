/// Request caller
///
/// The authorization middleware attaches a `Caller` to every request it
/// lets through. Handlers read it back with the extractors below instead of
/// touching request extensions directly.

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

use crate::auth::{Claims, PairId};
use crate::error::{AppError, AuthError};
use crate::identity::Identity;

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Authenticated(Claims),
    Anonymous,
}

impl Caller {
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Caller::Authenticated(claims) => Some(claims),
            Caller::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated(_))
    }
}

impl FromRequest for Caller {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let caller = req
            .extensions()
            .get::<Caller>()
            .cloned()
            .unwrap_or(Caller::Anonymous);
        ready(Ok(caller))
    }
}

/// A caller that presented a valid access token
///
/// Extraction fails with 401 when the request is anonymous.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    pub pair_id: PairId,
    pub claims: Claims,
}

impl TryFrom<Claims> for Authenticated {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            identity: claims.identity()?,
            pair_id: claims.pair_id()?,
            claims,
        })
    }
}

impl FromRequest for Authenticated {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let result = match req.extensions().get::<Caller>() {
            Some(Caller::Authenticated(claims)) => {
                Authenticated::try_from(claims.clone()).map_err(AppError::from)
            }
            _ => Err(AuthError::MissingToken.into()),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use chrono::Utc;

    fn claims() -> Claims {
        Claims::new(Identity::new(), PairId::new(), Utc::now(), 60, "test".to_string())
    }

    #[actix_web::test]
    async fn test_caller_defaults_to_anonymous() {
        let req = TestRequest::default().to_http_request();
        let caller = Caller::extract(&req).await.unwrap();

        assert_eq!(caller, Caller::Anonymous);
        assert!(caller.claims().is_none());
    }

    #[actix_web::test]
    async fn test_authenticated_extractor() {
        let claims = claims();
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(Caller::Authenticated(claims.clone()));

        let caller = Authenticated::extract(&req).await.unwrap();
        assert_eq!(caller.identity, claims.identity().unwrap());
        assert_eq!(caller.pair_id, claims.pair_id().unwrap());
    }

    #[actix_web::test]
    async fn test_authenticated_rejects_anonymous() {
        let req = TestRequest::default().to_http_request();
        req.extensions_mut().insert(Caller::Anonymous);

        let err = Authenticated::extract(&req).await.unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthError::MissingToken));
    }
}
