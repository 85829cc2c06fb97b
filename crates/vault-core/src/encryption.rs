//! Credential encryption for backend configuration export

use crate::AppError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};

/// Key-name fragments that mark a config field as a credential.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "secret",
    "access_key",
    "api_key",
    "token",
    "password",
    "credential",
    "private_key",
];

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key_lower.contains(fragment))
}

/// AES-256-GCM encryption for credentials carried in exported configs.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create from a raw 32-byte key.
    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self, AppError> {
        if key_bytes.len() != 32 {
            return Err(AppError::Configuration(
                "Encryption key must be 32 bytes (256 bits)".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create from a base64-encoded 32-byte key (the `ENCRYPTION_KEY` format).
    pub fn from_base64_key(encoded: &str) -> Result<Self, AppError> {
        let key_bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| {
                AppError::Configuration(format!("Failed to decode encryption key: {}", e))
            })?;

        Self::from_key_bytes(&key_bytes)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        // nonce || ciphertext, base64
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted: &str) -> Result<String, AppError> {
        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| AppError::Validation(format!("Failed to decode encrypted data: {}", e)))?;

        if combined.len() < 12 {
            return Err(AppError::Validation("Encrypted data too short".to_string()));
        }

        let nonce = Nonce::from_slice(&combined[..12]);
        let ciphertext = &combined[12..];

        let plaintext = self.cipher.decrypt(nonce, ciphertext).map_err(|_| {
            AppError::Validation(
                "Decryption failed: wrong key or corrupted credentials".to_string(),
            )
        })?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Validation(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Split credential fields out of a config object and encrypt them.
    ///
    /// Returns the public part and, when any credential was present, the encrypted blob.
    pub fn encrypt_sensitive_json(
        &self,
        json: &Value,
    ) -> Result<(Value, Option<String>), AppError> {
        let (public_config, sensitive_config) = split_sensitive(json);

        let encrypted_data = match sensitive_config {
            Some(sensitive) => {
                let sensitive_json = serde_json::to_string(&sensitive).map_err(|e| {
                    AppError::Internal(format!("Failed to serialize sensitive config: {}", e))
                })?;
                Some(self.encrypt(&sensitive_json)?)
            }
            None => None,
        };

        Ok((public_config, encrypted_data))
    }

    /// Decrypt credential fields and merge them back into the public config.
    pub fn decrypt_and_merge_json(
        &self,
        public_json: &Value,
        encrypted_data: Option<&str>,
    ) -> Result<Value, AppError> {
        let encrypted_data = match encrypted_data {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(public_json.clone()),
        };

        let decrypted_str = self.decrypt(encrypted_data)?;
        let sensitive_config: Map<String, Value> = serde_json::from_str(&decrypted_str)
            .map_err(|e| AppError::Validation(format!("Failed to parse decrypted config: {}", e)))?;

        let mut merged = public_json.clone();
        if let Some(obj) = merged.as_object_mut() {
            for (key, value) in sensitive_config {
                obj.insert(key, value);
            }
        }

        Ok(merged)
    }
}

/// Remove credential fields from a config object without keeping them anywhere.
pub fn redact_sensitive_json(json: &Value) -> Value {
    split_sensitive(json).0
}

fn split_sensitive(json: &Value) -> (Value, Option<Map<String, Value>>) {
    let Some(obj) = json.as_object() else {
        return (json.clone(), None);
    };

    let mut public_config = Map::new();
    let mut sensitive_config = Map::new();

    for (key, value) in obj {
        if is_sensitive_key(key) && value.is_string() {
            sensitive_config.insert(key.clone(), value.clone());
        } else {
            public_config.insert(key.clone(), value.clone());
        }
    }

    let sensitive = (!sensitive_config.is_empty()).then_some(sensitive_config);
    (Value::Object(public_config), sensitive)
}
