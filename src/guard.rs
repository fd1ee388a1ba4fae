//! Per-request verification of access tokens.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::{self, HeaderName};
use axum::http::request::Parts;

use crate::store::{Device, RevocationRegistry};
use crate::token::{Claims, Signer};
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Gate in front of every protected operation.
pub struct AuthGuard {
    signer: Arc<Signer>,
    registry: Arc<dyn RevocationRegistry>,
}

impl AuthGuard {
    /// Create a new [`AuthGuard`].
    pub fn new(signer: Arc<Signer>, registry: Arc<dyn RevocationRegistry>) -> Self {
        Self { signer, registry }
    }

    /// Verify signature, expiry and revocation state of an access token.
    pub async fn authenticate(&self, token: &str) -> Result<Claims, ServerError> {
        let claims = self.signer.verify(token).map_err(|err| {
            tracing::debug!(error = %err, "access token refused");
            ServerError::Unauthorized
        })?;

        match self.registry.is_revoked(&claims.pair_id).await {
            Ok(false) => Ok(claims),
            Ok(true) => {
                tracing::debug!(pair_id = claims.pair_id, "access token revoked");
                Err(ServerError::Unauthorized)
            },
            Err(err) => {
                tracing::error!(error = %err, "revocation lookup failed");
                Err(ServerError::Unauthorized)
            },
        }
    }
}

/// Token carried by the `Authorization` header, if any.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Claims of a request that passed the [`AuthGuard`].
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or(ServerError::Unauthorized)?;
        let claims = state.guard.authenticate(token).await?;

        Ok(Authenticated(claims))
    }
}

impl FromRequestParts<AppState> for Device {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = state
            .config
            .trust_forwarded_for
            .then(|| {
                parts
                    .headers
                    .get(X_FORWARDED_FOR)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.split(',').next())
                    .map(|ip| ip.trim().to_owned())
            })
            .flatten();

        let ip = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        Ok(Device { ip, user_agent })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use chrono::Utc;

    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::token::tests::signer;

    #[tokio::test]
    async fn test_authenticate() {
        let signer = signer();
        let store = Arc::new(MemoryStore::default());
        let guard = AuthGuard::new(Arc::clone(&signer), store.clone());

        let claims = signer.claims("u1", "p1", Utc::now());
        let token = signer.sign(&claims).unwrap();
        assert_eq!(guard.authenticate(&token).await.unwrap(), claims);

        store.record("p1", claims.expires_at()).await.unwrap();
        assert!(matches!(
            guard.authenticate(&token).await,
            Err(ServerError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let signer = signer();
        let guard = AuthGuard::new(Arc::clone(&signer), Arc::new(MemoryStore::default()));

        let claims = signer.claims("u1", "p1", Utc::now() - chrono::Duration::hours(1));
        let token = signer.sign(&claims).unwrap();
        assert!(guard.authenticate(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_failure_fails_closed() {
        let signer = signer();
        let store = Arc::new(MemoryStore::default());
        let guard = AuthGuard::new(Arc::clone(&signer), store.clone());
        let token = signer.sign(&signer.claims("u1", "p1", Utc::now())).unwrap();

        store.fail_lookups(true);
        assert!(matches!(
            guard.authenticate(&token).await,
            Err(ServerError::Unauthorized)
        ));
    }

    #[test]
    fn test_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer(&headers), Some("abc.def"));
    }
}
