//! In-memory store, standing in for PostgreSQL in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{RefreshRecord, RefreshTokenStore, RevocationRegistry, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RefreshRecord>>,
    revoked: Mutex<HashMap<String, DateTime<Utc>>>,
    fail_saves: AtomicBool,
    fail_lookups: AtomicBool,
    fail_revocations: AtomicBool,
    yield_lookups: AtomicBool,
}

fn unavailable() -> StoreError {
    StoreError::Sql(sqlx::Error::PoolTimedOut)
}

impl MemoryStore {
    /// Make every following `save` fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every following registry lookup fail.
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make every following registry insert fail.
    pub fn fail_revocations(&self, fail: bool) {
        self.fail_revocations.store(fail, Ordering::SeqCst);
    }

    /// Make every following `find_active` yield to the scheduler after
    /// its read, so concurrent callers interleave.
    pub fn yield_lookups(&self, enabled: bool) {
        self.yield_lookups.store(enabled, Ordering::SeqCst);
    }

    pub fn get(&self, pair_id: &str) -> Option<RefreshRecord> {
        self.records.lock().unwrap().get(pair_id).cloned()
    }

    pub fn revocation(&self, pair_id: &str) -> Option<DateTime<Utc>> {
        self.revoked.lock().unwrap().get(pair_id).copied()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn save(&self, record: &RefreshRecord) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.pair_id) {
            return Err(StoreError::Conflict {
                pair_id: record.pair_id.clone(),
            });
        }
        records.insert(record.pair_id.clone(), record.clone());
        Ok(())
    }

    async fn find_active(
        &self,
        user_id: &str,
        pair_id: &str,
    ) -> Result<Option<RefreshRecord>, StoreError> {
        let now = Utc::now();
        let record = self
            .records
            .lock()
            .unwrap()
            .get(pair_id)
            .filter(|r| r.user_id == user_id && r.is_active(now))
            .cloned();

        if self.yield_lookups.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        Ok(record)
    }

    async fn mark_revoked(&self, secret_hash: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        match records
            .values_mut()
            .find(|r| r.secret_hash == secret_hash && r.is_active(now))
        {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn revoke_pair(&self, pair_id: &str) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();

        Ok(records
            .values_mut()
            .filter(|r| r.pair_id == pair_id && !r.revoked)
            .map(|r| r.revoked = true)
            .count() as u64)
    }
}

#[async_trait]
impl RevocationRegistry for MemoryStore {
    async fn record(
        &self,
        pair_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.fail_revocations.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        self.revoked
            .lock()
            .unwrap()
            .entry(pair_id.to_owned())
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, pair_id: &str) -> Result<bool, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        Ok(self.revoked.lock().unwrap().contains_key(pair_id))
    }

    async fn sweep(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut revoked = self.revoked.lock().unwrap();
        let before = revoked.len();
        revoked.retain(|_, expires_at| *expires_at >= now);

        Ok((before - revoked.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::store::Device;

    fn record(pair_id: &str, hash: &str, expires_at: DateTime<Utc>) -> RefreshRecord {
        RefreshRecord {
            user_id: "u1".into(),
            pair_id: pair_id.into(),
            secret_hash: hash.into(),
            device: Device::new("10.0.0.1", "curl/8"),
            issued_at: Utc::now(),
            expires_at,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn test_refresh_records() {
        let store = MemoryStore::default();
        let later = Utc::now() + Duration::hours(1);

        store.save(&record("p1", "h1", later)).await.unwrap();
        assert!(matches!(
            store.save(&record("p1", "h2", later)).await,
            Err(StoreError::Conflict { .. })
        ));

        assert!(store.find_active("u1", "p1").await.unwrap().is_some());
        assert!(store.find_active("u2", "p1").await.unwrap().is_none());

        assert!(store.mark_revoked("h1").await.unwrap());
        // idempotent.
        assert!(!store.mark_revoked("h1").await.unwrap());
        assert!(store.find_active("u1", "p1").await.unwrap().is_none());

        store
            .save(&record("p2", "h2", Utc::now() - Duration::seconds(1)))
            .await
            .unwrap();
        assert!(store.find_active("u1", "p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revocations() {
        let store = MemoryStore::default();

        store
            .record("old", Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        store
            .record("fresh", Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        assert!(store.is_revoked("old").await.unwrap());
        assert!(!store.is_revoked("unknown").await.unwrap());

        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(!store.is_revoked("old").await.unwrap());
        assert!(store.is_revoked("fresh").await.unwrap());
    }
}
