/// Middleware module
///
/// Bearer token authorization and the typed caller it attaches to requests.

mod caller;
mod jwt_middleware;

pub use caller::{Authenticated, Caller};
pub use jwt_middleware::AuthMiddleware;
