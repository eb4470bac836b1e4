//! Resolution of the history service application key.
//!
//! The key is configured sealed with AES-256-GCM as `base64(nonce || ciphertext)`
//! and opened with `reclaimer.audit.key_secret`. Plaintext keys must be opted
//! into with `key_encryption = "plaintext"`.

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::config::{AuditConfig, KeyEncryption};

use super::sink::AuditError;

const NONCE_LEN: usize = 12;

/// Resolves the configured application key into the header value.
pub trait KeyDecryptor: Send + Sync {
    fn decrypt(&self, encrypted: &str) -> Result<String, AuditError>;
}

/// Uses the configured key as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextKey;

impl KeyDecryptor for PlaintextKey {
    fn decrypt(&self, encrypted: &str) -> Result<String, AuditError> {
        Ok(encrypted.to_string())
    }
}

/// Opens keys sealed with AES-256-GCM.
#[derive(Clone)]
pub struct AesGcmKey {
    cipher: Aes256Gcm,
}

impl AesGcmKey {
    /// Build from a base64-encoded 32 byte secret.
    pub fn from_base64(secret: &str) -> Result<Self, AuditError> {
        let raw = BASE64
            .decode(secret.trim().as_bytes())
            .map_err(|e| AuditError::KeyDecryption(format!("secret is not base64: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&raw).map_err(|_| {
            AuditError::KeyDecryption(format!("secret must be 32 bytes, got {}", raw.len()))
        })?;
        Ok(Self { cipher })
    }

    /// Seal a key into the configured format.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AuditError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AuditError::KeyDecryption("encryption failed".to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }
}

impl KeyDecryptor for AesGcmKey {
    fn decrypt(&self, encrypted: &str) -> Result<String, AuditError> {
        let sealed = BASE64
            .decode(encrypted.trim().as_bytes())
            .map_err(|e| AuditError::KeyDecryption(format!("app key is not base64: {e}")))?;
        if sealed.len() <= NONCE_LEN {
            return Err(AuditError::KeyDecryption(
                "app key is shorter than its nonce".to_string(),
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuditError::KeyDecryption("authentication failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| AuditError::KeyDecryption("app key is not UTF-8".to_string()))
    }
}

/// The decryptor `reclaimer.audit.key_encryption` selects.
pub fn key_decryptor_from_config(config: &AuditConfig) -> Result<Box<dyn KeyDecryptor>, AuditError> {
    match config.key_encryption {
        KeyEncryption::Plaintext => Ok(Box::new(PlaintextKey)),
        KeyEncryption::AesGcm => {
            let secret = config
                .key_secret
                .as_deref()
                .ok_or(AuditError::MissingKeySecret)?;
            Ok(Box::new(AesGcmKey::from_base64(secret)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn test_aes_gcm_round_trip() {
        let key = AesGcmKey::from_base64(&secret()).unwrap();

        let sealed = key.encrypt("history-app-key").unwrap();

        assert_ne!(sealed, "history-app-key");
        assert_eq!(key.decrypt(&sealed).unwrap(), "history-app-key");
    }

    #[test]
    fn test_wrong_secret_fails_authentication() {
        let sealed = AesGcmKey::from_base64(&secret())
            .unwrap()
            .encrypt("history-app-key")
            .unwrap();
        let other = AesGcmKey::from_base64(&BASE64.encode([9u8; 32])).unwrap();

        assert!(matches!(
            other.decrypt(&sealed),
            Err(AuditError::KeyDecryption(_))
        ));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(AesGcmKey::from_base64("not base64!").is_err());
        assert!(AesGcmKey::from_base64(&BASE64.encode([1u8; 16])).is_err());

        let key = AesGcmKey::from_base64(&secret()).unwrap();
        assert!(key.decrypt(&BASE64.encode([0u8; 8])).is_err());
        assert!(key.decrypt("plain-key").is_err());
    }

    #[test]
    fn test_decryptor_selected_from_config() {
        let mut config = AuditConfig::default();
        assert!(matches!(
            key_decryptor_from_config(&config),
            Err(AuditError::MissingKeySecret)
        ));

        config.key_secret = Some(secret());
        let sealed = AesGcmKey::from_base64(&secret())
            .unwrap()
            .encrypt("k-123")
            .unwrap();
        let decryptor = key_decryptor_from_config(&config).unwrap();
        assert_eq!(decryptor.decrypt(&sealed).unwrap(), "k-123");

        config.key_encryption = KeyEncryption::Plaintext;
        let decryptor = key_decryptor_from_config(&config).unwrap();
        assert_eq!(decryptor.decrypt("k-123").unwrap(), "k-123");
    }
}
