//! AES-256-GCM cipher for sensitive configuration values.
//!
//! Integration passwords and API keys are encrypted in place inside
//! `config_json` before they reach SQLite. The wire form is the sentinel
//! prefix followed by base64(nonce || ciphertext), so `is_encrypted` is a
//! prefix check and `encrypt` is idempotent.
//!
//! `decrypt` never returns an error: legacy plaintext values pass through
//! unchanged, and a sentineled value that fails authentication (wrong or
//! rotated key) yields a masked placeholder. Callers cannot distinguish
//! plaintext from ciphertext without attempting decryption, so raising here
//! would poison every config read.

use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::core::settings::Settings;

/// Prefix marking an encrypted value.
pub const SENTINEL: &str = "__ENCRYPTED__:";

/// Placeholder returned when a sentineled value cannot be decrypted.
pub const DECRYPTION_FAILED: &str = "***DECRYPTION_FAILED***";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Symmetric authenticated cipher over string config values.
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    /// Cipher from a raw 256-bit key.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Load the key from `BANKING_ENCRYPTION_KEY` (base64), else from the
    /// key file under `base_dir`, generating and persisting a fresh key
    /// (mode 0600) when neither exists.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if let Ok(raw) = std::env::var("BANKING_ENCRYPTION_KEY") {
            if !raw.trim().is_empty() {
                return Self::from_base64(raw.trim());
            }
        }
        Self::from_key_file(&settings.encryption_key_file())
    }

    fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::validation(format!("Invalid encryption key encoding: {e}")))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::validation("Encryption key must be 32 bytes"))?;
        Ok(Self::new(key))
    }

    fn from_key_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            return Self::from_base64(contents.trim());
        }

        let key = Aes256Gcm::generate_key(&mut OsRng);
        let encoded = BASE64.encode(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, format!("{encoded}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        info!(path = %path.display(), "Generated new encryption key");
        Ok(Self {
            inner: Aes256Gcm::new(&key),
        })
    }

    /// Encrypt a value. Empty input and already-encrypted values are
    /// returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() || self.is_encrypted(plaintext) {
            return plaintext.to_string();
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // Encryption with a valid key and fresh nonce cannot fail; treat a
        // failure as a passthrough rather than surfacing an error path every
        // config write would have to handle.
        match self.inner.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                blob.extend_from_slice(&nonce);
                blob.extend_from_slice(&ciphertext);
                format!("{SENTINEL}{}", BASE64.encode(blob))
            }
            Err(_) => {
                warn!("Encryption failed; storing value unencrypted");
                plaintext.to_string()
            }
        }
    }

    /// Decrypt a value. Non-sentineled input is returned verbatim; a
    /// sentineled value that fails to decrypt yields [`DECRYPTION_FAILED`].
    pub fn decrypt(&self, value: &str) -> String {
        let Some(encoded) = value.strip_prefix(SENTINEL) else {
            return value.to_string();
        };
        let Ok(blob) = BASE64.decode(encoded) else {
            warn!("Failed to decode encrypted value; returning masked placeholder");
            return DECRYPTION_FAILED.to_string();
        };
        if blob.len() <= NONCE_LEN {
            warn!("Encrypted value too short; returning masked placeholder");
            return DECRYPTION_FAILED.to_string();
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        match self.inner.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plain) => String::from_utf8(plain).unwrap_or_else(|_| {
                warn!("Decrypted value is not UTF-8; returning masked placeholder");
                DECRYPTION_FAILED.to_string()
            }),
            Err(_) => {
                warn!("Failed to decrypt value; returning masked placeholder");
                DECRYPTION_FAILED.to_string()
            }
        }
    }

    /// Whether a value carries the encryption sentinel.
    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(SENTINEL)
    }
}
