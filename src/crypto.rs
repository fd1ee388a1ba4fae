//! Cryptographic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::config::Argon2 as ArgonConfig;

/// Bytes of randomness behind a pair identifier.
pub const PAIR_ID_LENGTH: usize = 16;
/// Bytes of randomness behind a refresh secret.
pub const SECRET_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Fill `length` bytes from the OS CSPRNG and hex encode them.
pub fn random_hex(length: usize) -> String {
    let mut bytes = Zeroizing::new(vec![0u8; length]);
    OsRng.fill_bytes(&mut bytes);
    hex::encode(&*bytes)
}

/// One-way hashing of refresh secrets using Argon2id and the PHC string
/// format.
///
/// Secrets are hashed together with the user they were issued for, so a
/// stolen hash row cannot be replayed for another account.
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    /// Create a new [`SecretHasher`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    fn material(user_id: &str, secret: &str) -> Zeroizing<String> {
        Zeroizing::new(format!("{user_id}:{secret}"))
    }

    /// Hash a refresh secret issued to `user_id`.
    pub fn hash(&self, user_id: &str, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let material = Self::material(user_id, secret);
        let hash = self
            .argon2()
            .hash_password(material.as_bytes(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Check a presented secret against a stored PHC string.
    ///
    /// An unparsable hash counts as a mismatch.
    pub fn verify(&self, user_id: &str, secret: &str, phc_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };
        let material = Self::material(user_id, secret);

        self.argon2()
            .verify_password(material.as_bytes(), &parsed)
            .is_ok()
    }
}
