//! Symmetric encryption for sensitive configuration fields
//!
//! Credentials, API keys and session tokens inside per-user adapter configs
//! are stored encrypted at rest. The wire format is
//! `enc:v1:` followed by base64 of `nonce (12 bytes) || ciphertext || tag`.
//!
//! The 32-byte key is sourced from, in order: the `OJO_ENCRYPTION_KEY`
//! environment variable, the `encryption_key` row in `system_configs`, or a
//! freshly generated key persisted back to the database.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;

use crate::db::Database;
use crate::error::StoreError;

const NONCE_SIZE: usize = 12;
const PREFIX: &str = "enc:v1:";
const KEY_ENV: &str = "OJO_ENCRYPTION_KEY";
const KEY_CONFIG: &str = "encryption_key";

/// Field names whose values are encrypted inside config blobs
const SENSITIVE_KEYS: &[&str] = &["password", "api_key", "token", "cookie", "sid", "secret"];

/// Encrypts and decrypts sensitive strings with a process-wide key
pub struct SecretStore {
    key: [u8; 32],
}

impl SecretStore {
    /// Build a store with an explicit key; used by tests
    pub fn with_key(key: [u8; 32]) -> Self {
        SecretStore { key }
    }

    /// Resolve the key from env → database → newly generated
    pub fn open(db: &Database) -> Result<Self, StoreError> {
        if let Ok(encoded) = std::env::var(KEY_ENV)
            && let Some(key) = decode_key(&encoded)
        {
            return Ok(SecretStore { key });
        }

        if let Some(encoded) = db.get_system_config(KEY_CONFIG)?
            && let Some(key) = decode_key(&encoded)
        {
            return Ok(SecretStore { key });
        }

        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        db.set_system_config(KEY_CONFIG, &B64.encode(key))?;
        tracing::info!("generated new encryption key and persisted it");
        Ok(SecretStore { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, StoreError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| StoreError::Encrypt(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Encrypt(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{PREFIX}{}", B64.encode(payload)))
    }

    pub fn decrypt(&self, value: &str) -> Result<String, StoreError> {
        let Some(encoded) = value.strip_prefix(PREFIX) else {
            // Plaintext legacy value
            return Ok(value.to_string());
        };

        let payload = B64
            .decode(encoded)
            .map_err(|e| StoreError::Decrypt(e.to_string()))?;
        if payload.len() < NONCE_SIZE + 17 {
            return Err(StoreError::Decrypt("payload too short".into()));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|e| StoreError::Decrypt(e.to_string()))?;
        let nonce = Nonce::from_slice(&payload[..NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &payload[NONCE_SIZE..])
            .map_err(|e| StoreError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| StoreError::Decrypt(e.to_string()))
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(PREFIX)
    }

    fn is_sensitive(key: &str) -> bool {
        let lower = key.to_lowercase();
        SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
    }

    /// Encrypt sensitive string fields of a JSON object in place
    pub fn encrypt_fields(&self, value: &mut serde_json::Value) -> Result<(), StoreError> {
        if let Some(map) = value.as_object_mut() {
            for (key, field) in map.iter_mut() {
                if !Self::is_sensitive(key) {
                    continue;
                }
                if let Some(s) = field.as_str()
                    && !s.is_empty()
                    && !Self::is_encrypted(s)
                {
                    *field = serde_json::Value::String(self.encrypt(s)?);
                }
            }
        }
        Ok(())
    }

    /// Decrypt sensitive string fields of a JSON object in place
    pub fn decrypt_fields(&self, value: &mut serde_json::Value) -> Result<(), StoreError> {
        if let Some(map) = value.as_object_mut() {
            for (key, field) in map.iter_mut() {
                if !Self::is_sensitive(key) {
                    continue;
                }
                if let Some(s) = field.as_str()
                    && Self::is_encrypted(s)
                {
                    *field = serde_json::Value::String(self.decrypt(s)?);
                }
            }
        }
        Ok(())
    }
}

fn decode_key(encoded: &str) -> Option<[u8; 32]> {
    let bytes = B64.decode(encoded.trim()).ok()?;
    <[u8; 32]>::try_from(bytes.as_slice()).ok()
}
