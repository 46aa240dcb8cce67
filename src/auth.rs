use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::UserId;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token sealing failed")]
    Seal,
    #[error("Token is malformed or was not issued by this server")]
    Invalid,
    #[error("Token expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub exp: i64,
}

/// Seals bearer claims with AES-256-GCM. Any token that decrypts under our
/// key was issued by us, so no separate signature is carried.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn issue(&self, user: &UserId, ttl: Duration) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user.clone(),
            exp: Utc::now()
                .checked_add_signed(ttl)
                .ok_or(TokenError::Seal)?
                .timestamp(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| TokenError::Seal)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, payload.as_slice())
            .map_err(|_| TokenError::Seal)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let sealed = BASE64.decode(token.trim()).map_err(|_| TokenError::Invalid)?;

        if sealed.len() <= NONCE_LEN {
            return Err(TokenError::Invalid);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TokenError::Invalid)?;

        let claims: Claims = serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
