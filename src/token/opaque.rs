//! Opaque refresh token codec.
//!
//! A refresh token is the standard base64 form of `<pair_id>:<secret>`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use super::TokenError;

const SEPARATOR: char = ':';

/// Decoded refresh token.
pub struct RefreshToken {
    pub pair_id: String,
    pub secret: Zeroizing<String>,
}

/// Encode a pairing and its secret.
pub fn encode(pair_id: &str, secret: &str) -> String {
    let plain = Zeroizing::new(format!("{pair_id}{SEPARATOR}{secret}"));
    STANDARD.encode(plain.as_bytes())
}

/// Decode a presented refresh token.
pub fn decode(token: &str) -> Result<RefreshToken, TokenError> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(token.trim())
            .map_err(|_| TokenError::MalformedRefreshToken)?,
    );
    let plain = std::str::from_utf8(&raw)
        .map_err(|_| TokenError::MalformedRefreshToken)?;

    match plain.split_once(SEPARATOR) {
        Some((pair_id, secret)) if !pair_id.is_empty() && !secret.is_empty() => {
            Ok(RefreshToken {
                pair_id: pair_id.to_owned(),
                secret: Zeroizing::new(secret.to_owned()),
            })
        },
        _ => Err(TokenError::MalformedRefreshToken),
    }
}
