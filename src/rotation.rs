//! Refresh token rotation.
//!
//! A refresh token is single use. Presenting it together with the access
//! token of the same pairing yields a brand new pair and invalidates both
//! old tokens. Any reuse of a consumed refresh token is refused, which
//! gives replay detection for free.

use std::sync::Arc;

use crate::crypto::SecretHasher;
use crate::error::{Result, ServerError};
use crate::notifier::{self, AnomalyNotifier, IpChange};
use crate::store::{self, Device, RefreshTokenStore, RevocationRegistry};
use crate::token::{Claims, Signer, TokenIssuer, TokenPair, opaque};

/// Refuse a rotation. The reason is only logged: every refusal looks the
/// same from outside.
fn reject(reason: &'static str) -> ServerError {
    metrics::counter!("token_rotations_total", "outcome" => reason).increment(1);
    tracing::debug!(reason, "refresh refused");
    ServerError::Unauthorized
}

/// Protocol engine behind `POST /auth/refresh`.
pub struct RefreshRotator {
    signer: Arc<Signer>,
    issuer: Arc<TokenIssuer>,
    hasher: Arc<SecretHasher>,
    store: Arc<dyn RefreshTokenStore>,
    registry: Arc<dyn RevocationRegistry>,
    notifier: Arc<dyn AnomalyNotifier>,
}

impl RefreshRotator {
    /// Create a new [`RefreshRotator`].
    pub fn new(
        signer: Arc<Signer>,
        issuer: Arc<TokenIssuer>,
        hasher: Arc<SecretHasher>,
        store: Arc<dyn RefreshTokenStore>,
        registry: Arc<dyn RevocationRegistry>,
        notifier: Arc<dyn AnomalyNotifier>,
    ) -> Self {
        Self {
            signer,
            issuer,
            hasher,
            store,
            registry,
            notifier,
        }
    }

    /// Exchange a pair of tokens for a new one.
    ///
    /// Nothing is written before every check passed, except when the user
    /// agent changed: the pairing is then revoked as a whole.
    pub async fn rotate(
        &self,
        access_token: &str,
        refresh_token: &str,
        device: &Device,
    ) -> Result<TokenPair> {
        // Expired access tokens are fine here, the refresh secret proves
        // liveness.
        let claims = self
            .signer
            .verify_signature(access_token)
            .map_err(|_| reject("bad_signature"))?;
        let presented =
            opaque::decode(refresh_token).map_err(|_| reject("malformed"))?;

        if presented.pair_id != claims.pair_id {
            return Err(reject("pair_mismatch"));
        }

        if self.registry.is_revoked(&claims.pair_id).await? {
            return Err(reject("revoked"));
        }

        let Some(record) = self
            .store
            .find_active(&claims.user_id, &claims.pair_id)
            .await?
        else {
            return Err(reject("not_found"));
        };

        if !self
            .hasher
            .verify(&claims.user_id, &presented.secret, &record.secret_hash)
        {
            return Err(reject("secret_mismatch"));
        }

        if record.device.ip != device.ip {
            notifier::dispatch(
                Arc::clone(&self.notifier),
                IpChange {
                    user_id: claims.user_id.clone(),
                    old_ip: record.device.ip.clone(),
                    new_ip: device.ip.clone(),
                },
            );
        }

        if record.device.user_agent != device.user_agent {
            tracing::warn!(
                user_id = claims.user_id,
                pair_id = claims.pair_id,
                "user agent changed on refresh, revoking pairing"
            );
            if let Err(err) = store::revoke_pairing(
                self.registry.as_ref(),
                self.store.as_ref(),
                &claims.pair_id,
                claims.expires_at(),
            )
            .await
            {
                tracing::error!(error = %err, pair_id = claims.pair_id, "failed to revoke pairing");
            }
            return Err(reject("user_agent_changed"));
        }

        self.replace(&claims, &record.secret_hash, device).await
    }

    /// Consume the old pairing and persist the new one.
    ///
    /// The old pairing is revoked before the new record is saved, so a
    /// failure in between leaves no valid pairing rather than two.
    async fn replace(
        &self,
        claims: &Claims,
        old_secret_hash: &str,
        device: &Device,
    ) -> Result<TokenPair> {
        let issued = self.issuer.issue(&claims.user_id)?;

        self.registry
            .record(&claims.pair_id, claims.expires_at())
            .await?;

        if !self.store.mark_revoked(old_secret_hash).await? {
            // Another rotation consumed this record first.
            return Err(reject("already_consumed"));
        }

        self.store
            .save(&issued.pending.into_record(device.clone()))
            .await?;

        metrics::counter!("token_rotations_total", "outcome" => "rotated").increment(1);
        tracing::info!(
            user_id = claims.user_id,
            old_pair_id = claims.pair_id,
            pair_id = issued.pair.pair_id,
            "token pair rotated"
        );

        Ok(issued.pair)
    }
}

/// Revoke the pairing of an authenticated request.
pub async fn logout(
    registry: &dyn RevocationRegistry,
    store: &dyn RefreshTokenStore,
    claims: &Claims,
) -> Result<()> {
    store::revoke_pairing(registry, store, &claims.pair_id, claims.expires_at())
        .await?;

    Ok(())
}
