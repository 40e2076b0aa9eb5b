// crates/server/src/crypto.rs
//! Credential encryption at rest: AES-256-GCM with a key derived from the
//! operator's passphrase (SHA-256). Wire format is base64(nonce || ciphertext).

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,
}

/// String-to-string encryption service built from the `APP_SECRET_KEY`
/// passphrase. Constructed once at startup and shared via the app state.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let combined = BASE64.decode(encoded).map_err(|_| CryptoError::Decrypt)?;
        if combined.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = CredentialCipher::new("correct horse battery staple");
        let encrypted = cipher.encrypt(r#"{"api_key":"sk-123"}"#).unwrap();
        assert_ne!(encrypted, r#"{"api_key":"sk-123"}"#);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), r#"{"api_key":"sk-123"}"#);
    }

    #[test]
    fn nonces_differ_between_calls() {
        let cipher = CredentialCipher::new("passphrase");
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_passphrase_fails_cleanly() {
        let cipher = CredentialCipher::new("one");
        let other = CredentialCipher::new("two");
        let encrypted = cipher.encrypt("secret").unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn garbage_input_fails_cleanly() {
        let cipher = CredentialCipher::new("passphrase");
        assert!(cipher.decrypt("not base64!!").is_err());
        assert!(cipher.decrypt("AAAA").is_err());
    }
}
