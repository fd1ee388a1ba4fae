//! Durable state: refresh records and the revocation registry.
//!
//! Both are reached only through the traits below so the rotation engine
//! never depends on a concrete database.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("pair `{pair_id}` already exists")]
    Conflict { pair_id: String },
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Device fingerprint captured at issuance and rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub ip: String,
    pub user_agent: String,
}

impl Device {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Persisted refresh credential. Only the secret hash is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub user_id: String,
    pub pair_id: String,
    pub secret_hash: String,
    pub device: Device,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// Refresh records keyed by pair identifier.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a record. Fails with [`StoreError::Conflict`] if the pair
    /// already exists.
    async fn save(&self, record: &RefreshRecord) -> Result<(), StoreError>;

    /// Find an unrevoked, unexpired record.
    async fn find_active(
        &self,
        user_id: &str,
        pair_id: &str,
    ) -> Result<Option<RefreshRecord>, StoreError>;

    /// Revoke the active record holding `secret_hash`.
    ///
    /// Returns `false` when no active record was left to revoke, which is
    /// not an error.
    async fn mark_revoked(&self, secret_hash: &str) -> Result<bool, StoreError>;

    /// Revoke every record of a pair. Returns how many were flipped.
    async fn revoke_pair(&self, pair_id: &str) -> Result<u64, StoreError>;
}

/// Pairs whose access token must be refused before it expires.
#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    /// Insert a marker, doing nothing if it already exists.
    async fn record(
        &self,
        pair_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn is_revoked(&self, pair_id: &str) -> Result<bool, StoreError>;

    /// Delete markers past their expiry. Returns how many were deleted.
    async fn sweep(&self) -> Result<u64, StoreError>;
}

/// Revoke a pairing outright: its access token and all its refresh
/// records.
pub async fn revoke_pairing(
    registry: &dyn RevocationRegistry,
    store: &dyn RefreshTokenStore,
    pair_id: &str,
    access_expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    registry.record(pair_id, access_expires_at).await?;
    let revoked = store.revoke_pair(pair_id).await?;

    tracing::info!(%pair_id, records = revoked, "pairing revoked");
    Ok(())
}
