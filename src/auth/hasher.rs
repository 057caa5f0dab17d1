/// Refresh Secret Hashing and Verification
///
/// Refresh secrets are hashed with bcrypt before they are persisted, so a
/// leaked refresh record does not hand out a usable refresh token.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::{AppError, ConfigError};

/// Lowest cost bcrypt accepts
pub const MIN_HASH_COST: u32 = 4;
/// Highest cost bcrypt accepts
pub const MAX_HASH_COST: u32 = 31;

/// Salted, deliberately slow one-way hashing of refresh secrets
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    cost: u32,
}

impl CredentialHasher {
    /// # Errors
    /// Returns a config error if `cost` is outside bcrypt's range
    pub fn new(cost: u32) -> Result<Self, AppError> {
        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
            return Err(AppError::Config(ConfigError::InvalidValue(format!(
                "session.hash_cost must be between {} and {}",
                MIN_HASH_COST, MAX_HASH_COST
            ))));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a secret; every call uses a fresh salt
    pub fn hash(&self, secret: &str) -> Result<String, AppError> {
        hash(secret, self.cost)
            .map_err(|e| AppError::Internal(format!("Secret hashing failed: {}", e)))
    }

    /// Verify a secret against its hash
    ///
    /// # Errors
    /// Returns error if the stored hash is not a bcrypt hash
    pub fn verify(&self, secret: &str, hashed: &str) -> Result<bool, AppError> {
        verify(secret, hashed)
            .map_err(|e| AppError::Internal(format!("Secret verification failed: {}", e)))
    }

    /// `verify` on tokio's blocking pool, for callers on an async worker
    pub async fn verify_async(&self, secret: &str, hashed: &str) -> Result<bool, AppError> {
        let hasher = *self;
        let secret = secret.to_string();
        let hashed = hashed.to_string();

        tokio::task::spawn_blocking(move || hasher.verify(&secret, &hashed))
            .await
            .map_err(|e| AppError::Internal(format!("Secret verification task failed: {}", e)))?
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CredentialHasher {
        CredentialHasher::new(MIN_HASH_COST).unwrap()
    }

    #[test]
    fn test_hash_secret() {
        let secret = "n0tS0s3cr3tButL0ngEnoughToMatter";
        let hashed = hasher().hash(secret).expect("Failed to hash secret");

        assert_ne!(secret, hashed);
        assert!(hashed.starts_with("$2"));
        assert_eq!(hashed.len(), 60);
    }

    #[test]
    fn test_hash_is_salted() {
        let secret = "sameSecretTwice";
        let first = hasher().hash(secret).unwrap();
        let second = hasher().hash(secret).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_secret() {
        let hashed = hasher().hash("correctSecret").unwrap();

        assert!(hasher().verify("correctSecret", &hashed).unwrap());
        assert!(!hasher().verify("wrongSecret", &hashed).unwrap());
    }

    #[tokio::test]
    async fn test_verify_async_matches_verify() {
        let hashed = hasher().hash("correctSecret").unwrap();

        assert!(hasher().verify_async("correctSecret", &hashed).await.unwrap());
        assert!(!hasher().verify_async("wrongSecret", &hashed).await.unwrap());
        assert!(hasher().verify_async("secret", "plaintext-not-a-hash").await.is_err());
    }

    #[test]
    fn test_verify_rejects_non_bcrypt_hash() {
        assert!(hasher().verify("secret", "plaintext-not-a-hash").is_err());
    }

    #[test]
    fn test_cost_bounds() {
        assert!(CredentialHasher::new(MIN_HASH_COST - 1).is_err());
        assert!(CredentialHasher::new(MAX_HASH_COST + 1).is_err());
        assert_eq!(CredentialHasher::default().cost(), DEFAULT_COST);
    }
}
