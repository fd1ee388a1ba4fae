//! Sign and verify access tokens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};

use super::TokenError;

const LEEWAY: u64 = 5; // seconds.

/// Pieces of information asserted on an access token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub user_id: String,
    /// Pairing shared with the refresh token.
    pub pair_id: String,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
}

impl Claims {
    /// Expiration as a date, used to size revocation entries.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.exp)
            .ok()
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// HS512 JWT signer.
#[derive(Clone)]
pub struct Signer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    lifetime: Duration,
}

impl Signer {
    /// Create a new [`Signer`].
    pub fn new(
        secret: impl AsRef<[u8]>,
        issuer: impl Into<String>,
        lifetime: Duration,
    ) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }

        Ok(Self {
            algorithm: Algorithm::HS512,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            lifetime,
        })
    }

    /// Build claims for a pairing, valid from `now`.
    pub fn claims(
        &self,
        user_id: &str,
        pair_id: &str,
        now: DateTime<Utc>,
    ) -> Claims {
        let iat = now.timestamp().max(0) as u64;

        Claims {
            user_id: user_id.to_owned(),
            pair_id: pair_id.to_owned(),
            iat,
            exp: iat + self.lifetime.as_secs(),
            iss: self.issuer.clone(),
        }
    }

    /// Sign claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        Ok(encode(&Header::new(self.algorithm), claims, &self.encoding_key)?)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = LEEWAY;
        validation
    }

    /// Decode a token, checking signature, issuer and expiration.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation())?
            .claims)
    }

    /// Decode a token, checking signature and issuer only.
    ///
    /// An expired token still identifies its pairing.
    pub fn verify_signature(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = self.validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}
