/// Authentication module
///
/// Credential hashing, access token encoding, refresh record storage,
/// the pair blacklist and the session manager tying them together.

mod blacklist;
mod claims;
mod cleaner;
mod hasher;
mod jwt;
mod refresh_token;
mod session;
pub mod store;

pub use blacklist::{Blacklist, InMemoryBlacklist};
pub use claims::Claims;
pub use cleaner::start_expiration_cleaner;
pub use hasher::{CredentialHasher, MAX_HASH_COST, MIN_HASH_COST};
pub use jwt::{CodecError, TokenCodec};
pub use refresh_token::{generate_secret, PairId, RefreshToken};
pub use session::{SessionManager, TokenPair};
pub use store::{InMemoryTokenStore, PgTokenStore, RefreshRecord, StoreError, TokenStore};
