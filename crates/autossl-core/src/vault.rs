// Note: Deprecation warnings from generic-array 0.14.x are expected
// These will be resolved when aes-gcm upgrades to 0.11.0 (currently in RC)
// which uses generic-array 1.x
#![allow(deprecated)]

use aes_gcm::{
    aead::{Aead, KeyInit},
    AeadCore, Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Data encryption key is empty")]
    EmptyKey,

    #[error("Invalid encrypted payload: {0}")]
    InvalidPayload(String),

    #[error("Encrypted payload failed authentication")]
    AuthenticationFailed,

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decrypted payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// AES-256-GCM envelope encryption for secrets and PEM material.
///
/// Envelopes have the shape `base64(iv).base64(tag).base64(ciphertext)`.
#[derive(Clone)]
pub struct CredentialVault {
    key: Arc<[u8; KEY_LENGTH]>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Derives the vault key from an operator supplied secret.
    ///
    /// The secret is read as a 64 character hex key, then as a base64 encoded
    /// 32 byte key, and otherwise hashed with SHA-256.
    pub fn new(secret: &str) -> Result<Self, VaultError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(VaultError::EmptyKey);
        }

        let key = Self::derive_key(secret);
        Ok(Self { key: Arc::new(key) })
    }

    fn derive_key(secret: &str) -> [u8; KEY_LENGTH] {
        let mut key = [0u8; KEY_LENGTH];

        if secret.len() == 64 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(bytes) = hex::decode(secret) {
                key.copy_from_slice(&bytes);
                return key;
            }
        }

        if looks_like_base64_key(secret) {
            if let Ok(bytes) = BASE64.decode(secret) {
                if bytes.len() == KEY_LENGTH {
                    key.copy_from_slice(&bytes);
                    return key;
                }
            }
        }

        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, VaultError> {
        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        let nonce = Aes256Gcm::generate_nonce(&mut aes_gcm::aead::OsRng);

        // aes-gcm appends the tag to the ciphertext
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);

        Ok(format!(
            "{}.{}.{}",
            BASE64.encode(nonce),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, VaultError> {
        let parts: Vec<&str> = envelope.split('.').collect();
        let [iv, tag, ciphertext] = parts.as_slice() else {
            return Err(VaultError::InvalidPayload(
                "expected three dot separated parts".to_string(),
            ));
        };
        if iv.is_empty() || tag.is_empty() {
            return Err(VaultError::InvalidPayload(
                "missing iv or authentication tag".to_string(),
            ));
        }

        let iv = decode_part(iv, "iv")?;
        let tag = decode_part(tag, "tag")?;
        let ciphertext = decode_part(ciphertext, "ciphertext")?;

        if iv.len() != NONCE_LENGTH {
            return Err(VaultError::InvalidPayload(format!(
                "iv must be {} bytes, got {}",
                NONCE_LENGTH,
                iv.len()
            )));
        }
        if tag.len() != TAG_LENGTH {
            return Err(VaultError::InvalidPayload(format!(
                "tag must be {} bytes, got {}",
                TAG_LENGTH,
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(self.key.as_slice().into());
        cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| VaultError::AuthenticationFailed)
    }

    pub fn encrypt_string(&self, plaintext: &str) -> Result<String, VaultError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, envelope: &str) -> Result<String, VaultError> {
        Ok(String::from_utf8(self.decrypt(envelope)?)?)
    }

    /// Serializes `value` as JSON and seals it.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, VaultError> {
        let json = serde_json::to_string(value)?;
        self.encrypt_string(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, VaultError> {
        let json = self.decrypt_string(envelope)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Generates a random key as a 64 character hex string
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}

fn looks_like_base64_key(secret: &str) -> bool {
    (43..=44).contains(&secret.len())
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, VaultError> {
    BASE64
        .decode(part)
        .map_err(|e| VaultError::InvalidPayload(format!("{} is not valid base64: {}", name, e)))
}
