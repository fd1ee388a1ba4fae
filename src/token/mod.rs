//! Manage token pairs: a signed access token bound to an opaque refresh
//! token through a shared pair identifier.

pub mod opaque;
pub mod signer;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::crypto::{CryptoError, PAIR_ID_LENGTH, SECRET_LENGTH, SecretHasher, random_hex};
use crate::store::{Device, RefreshRecord};
pub use signer::{Claims, Signer};

#[derive(thiserror::Error, Debug)]
pub enum TokenError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("token signing secret is missing")]
    MissingSecret,
    #[error("refresh token is malformed")]
    MalformedRefreshToken,
    #[error("refresh lifetime is out of range")]
    Lifetime,
}

/// Tokens handed to the client. Never persisted as a unit.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub pair_id: String,
}

/// Refresh record awaiting the device it will be bound to.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub user_id: String,
    pub pair_id: String,
    pub secret_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingRecord {
    /// Bind to the requesting device.
    pub fn into_record(self, device: Device) -> RefreshRecord {
        RefreshRecord {
            user_id: self.user_id,
            pair_id: self.pair_id,
            secret_hash: self.secret_hash,
            device,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            revoked: false,
        }
    }
}

/// Output of [`TokenIssuer::issue`].
#[derive(Debug, Clone)]
pub struct IssuedPair {
    pub pair: TokenPair,
    pub pending: PendingRecord,
}

/// Create fresh token pairs. Does no I/O.
pub struct TokenIssuer {
    signer: Arc<Signer>,
    hasher: Arc<SecretHasher>,
    refresh_lifetime: chrono::Duration,
}

impl TokenIssuer {
    /// Create a new [`TokenIssuer`].
    pub fn new(
        signer: Arc<Signer>,
        hasher: Arc<SecretHasher>,
        refresh_lifetime: std::time::Duration,
    ) -> Result<Self, TokenError> {
        let refresh_lifetime = chrono::Duration::from_std(refresh_lifetime)
            .map_err(|_| TokenError::Lifetime)?;

        Ok(Self {
            signer,
            hasher,
            refresh_lifetime,
        })
    }

    /// Issue a new pair for `user_id`.
    pub fn issue(&self, user_id: &str) -> Result<IssuedPair, TokenError> {
        let now = Utc::now();
        let pair_id = random_hex(PAIR_ID_LENGTH);
        let secret = zeroize::Zeroizing::new(random_hex(SECRET_LENGTH));

        let secret_hash = self.hasher.hash(user_id, &secret)?;
        let access_token =
            self.signer.sign(&self.signer.claims(user_id, &pair_id, now))?;
        let refresh_token = opaque::encode(&pair_id, &secret);

        Ok(IssuedPair {
            pair: TokenPair {
                access_token,
                refresh_token,
                pair_id: pair_id.clone(),
            },
            pending: PendingRecord {
                user_id: user_id.to_owned(),
                pair_id,
                secret_hash,
                issued_at: now,
                expires_at: now + self.refresh_lifetime,
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;

    pub const ISSUER: &str = "https://auth.example.com/";
    pub const SECRET: &str = "test-signing-secret";

    pub fn signer() -> Arc<Signer> {
        Arc::new(Signer::new(SECRET, ISSUER, Duration::from_secs(900)).unwrap())
    }

    pub fn issuer(signer: Arc<Signer>) -> TokenIssuer {
        TokenIssuer::new(
            signer,
            Arc::new(crate::crypto::tests::hasher()),
            Duration::from_secs(60 * 60 * 24),
        )
        .unwrap()
    }

    #[test]
    fn test_issue() {
        let signer = signer();
        let hasher = crate::crypto::tests::hasher();
        let issued = issuer(Arc::clone(&signer)).issue("u1").unwrap();

        let claims = signer.verify(&issued.pair.access_token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.pair_id, issued.pair.pair_id);
        assert_eq!(claims.iss, ISSUER);

        let refresh = opaque::decode(&issued.pair.refresh_token).unwrap();
        assert_eq!(refresh.pair_id, issued.pair.pair_id);
        assert_eq!(refresh.pair_id.len(), PAIR_ID_LENGTH * 2);
        assert!(hasher.verify("u1", &refresh.secret, &issued.pending.secret_hash));

        let pending = issued.pending;
        assert_eq!(pending.pair_id, issued.pair.pair_id);
        assert_eq!(pending.expires_at - pending.issued_at, chrono::Duration::days(1));

        let record = pending.into_record(Device::new("10.0.0.1", "curl/8"));
        assert!(!record.revoked);
        assert_eq!(record.device.ip, "10.0.0.1");
    }

    #[test]
    fn test_pairs_are_unique() {
        let issuer = issuer(signer());
        let a = issuer.issue("u1").unwrap();
        let b = issuer.issue("u1").unwrap();

        assert_ne!(a.pair.pair_id, b.pair.pair_id);
        assert_ne!(a.pair.refresh_token, b.pair.refresh_token);
        assert_ne!(a.pending.secret_hash, b.pending.secret_hash);
    }
}
