use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{to_seconds, IssuedRefresh, RefreshRecord, StoreError, TokenStore};
use crate::auth::hasher::CredentialHasher;
use crate::auth::refresh_token::{generate_secret, PairId};
use crate::identity::Identity;
use crate::validators::ClientContext;

/// Refresh records held in process memory
///
/// A single mutex guards the map. It is never held across a bcrypt
/// verification; `take` verifies a copy of the record and the caller whose
/// `remove` returns the record is the single winner.
pub struct InMemoryTokenStore {
    hasher: CredentialHasher,
    records: Mutex<HashMap<PairId, RefreshRecord>>,
}

impl InMemoryTokenStore {
    pub fn new(hasher: CredentialHasher) -> Self {
        Self {
            hasher,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn get(&self, pair_id: PairId) -> Option<RefreshRecord> {
        self.records.lock().await.get(&pair_id).cloned()
    }

    async fn verify(&self, record: &RefreshRecord, secret: &str) -> Result<(), StoreError> {
        if self.hasher.verify_async(secret, &record.secret_hash).await? {
            Ok(())
        } else {
            Err(StoreError::SecretMismatch)
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn create(
        &self,
        identity: Identity,
        client_context: &ClientContext,
        not_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedRefresh, StoreError> {
        let pair_id = PairId::new();
        let secret = generate_secret();
        let secret_hash = self.hasher.hash(&secret)?;

        let record = RefreshRecord {
            pair_id,
            identity,
            secret_hash,
            client_context: client_context.as_str().to_string(),
            not_before: to_seconds(not_before),
            expires_at: to_seconds(expires_at),
            created_at: to_seconds(Utc::now()),
        };
        self.records.lock().await.insert(pair_id, record);

        Ok(IssuedRefresh { pair_id, secret })
    }

    async fn redeem(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError> {
        let record = self
            .records
            .lock()
            .await
            .get(&pair_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        self.verify(&record, secret).await?;
        record.check_window(now)?;
        Ok(record)
    }

    async fn take(
        &self,
        pair_id: PairId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshRecord, StoreError> {
        let record = self
            .records
            .lock()
            .await
            .get(&pair_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        self.verify(&record, secret).await?;
        match record.check_window(now) {
            Err(StoreError::NotYetValid) => Err(StoreError::NotYetValid),
            // Expired records are dropped as well
            window => {
                let removed = self
                    .records
                    .lock()
                    .await
                    .remove(&pair_id)
                    .ok_or(StoreError::NotFound)?;
                window.map(|()| removed)
            }
        }
    }

    async fn delete(&self, pair_id: PairId) -> Result<(), StoreError> {
        self.records.lock().await.remove(&pair_id);
        Ok(())
    }

    async fn delete_all_for_identity(&self, identity: Identity) -> Result<Vec<PairId>, StoreError> {
        let mut records = self.records.lock().await;
        let doomed: Vec<PairId> = records
            .values()
            .filter(|record| record.identity == identity)
            .map(|record| record.pair_id)
            .collect();

        for pair_id in &doomed {
            records.remove(pair_id);
        }
        Ok(doomed)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at >= now);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hasher::MIN_HASH_COST;
    use chrono::Duration;
    use std::sync::Arc;

    fn store() -> InMemoryTokenStore {
        InMemoryTokenStore::new(CredentialHasher::new(MIN_HASH_COST).unwrap())
    }

    async fn create(store: &InMemoryTokenStore, identity: Identity) -> IssuedRefresh {
        let now = Utc::now();
        store
            .create(
                identity,
                &ClientContext::new("test-agent"),
                now,
                now + Duration::seconds(60),
            )
            .await
            .expect("Failed to create record")
    }

    #[tokio::test]
    async fn test_create_stores_only_hash() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        let record = store.get(issued.pair_id).await.unwrap();
        assert_ne!(record.secret_hash, issued.secret);
        assert!(!record.secret_hash.contains(&issued.secret));
        assert_eq!(record.client_context, "test-agent");
    }

    #[tokio::test]
    async fn test_redeem_does_not_consume() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        store.redeem(issued.pair_id, &issued.secret, Utc::now()).await.unwrap();
        store.redeem(issued.pair_id, &issued.secret, Utc::now()).await.unwrap();

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_redeem_failures() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        assert!(matches!(
            store.redeem(PairId::new(), &issued.secret, Utc::now()).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.redeem(issued.pair_id, "wrong", Utc::now()).await,
            Err(StoreError::SecretMismatch)
        ));
        assert!(matches!(
            store
                .redeem(issued.pair_id, &issued.secret, Utc::now() + Duration::seconds(120))
                .await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_take_consumes_once() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        store.take(issued.pair_id, &issued.secret, Utc::now()).await.unwrap();

        assert!(matches!(
            store.take(issued.pair_id, &issued.secret, Utc::now()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_take_keeps_record_on_mismatch() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        assert!(matches!(
            store.take(issued.pair_id, "wrong", Utc::now()).await,
            Err(StoreError::SecretMismatch)
        ));
        assert!(store.take(issued.pair_id, &issued.secret, Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_take_deletes_expired_record() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        let later = Utc::now() + Duration::seconds(120);
        assert!(matches!(
            store.take(issued.pair_id, &issued.secret, later).await,
            Err(StoreError::Expired)
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_take_keeps_record_before_window() {
        let store = store();
        let now = Utc::now();
        let issued = store
            .create(
                Identity::new(),
                &ClientContext::new("test-agent"),
                now + Duration::seconds(30),
                now + Duration::seconds(60),
            )
            .await
            .unwrap();

        assert!(matches!(
            store.take(issued.pair_id, &issued.secret, now).await,
            Err(StoreError::NotYetValid)
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_single_winner() {
        let store = Arc::new(store());
        let issued = create(&store, Identity::new()).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let secret = issued.secret.clone();
                let pair_id = issued.pair_id;
                tokio::spawn(async move { store.take(pair_id, &secret, Utc::now()).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StoreError::NotFound) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store();
        let issued = create(&store, Identity::new()).await;

        store.delete(issued.pair_id).await.unwrap();
        store.delete(issued.pair_id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_all_for_identity() {
        let store = store();
        let identity = Identity::new();
        let first = create(&store, identity).await;
        let second = create(&store, identity).await;
        let other = create(&store, Identity::new()).await;

        let mut removed = store.delete_all_for_identity(identity).await.unwrap();
        removed.sort_by_key(|pair_id| pair_id.0);
        let mut expected = vec![first.pair_id, second.pair_id];
        expected.sort_by_key(|pair_id| pair_id.0);

        assert_eq!(removed, expected);
        assert!(store.get(other.pair_id).await.is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = store();
        create(&store, Identity::new()).await;

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 0);
        assert_eq!(
            store.purge_expired(Utc::now() + Duration::seconds(120)).await.unwrap(),
            1
        );
    }
}
