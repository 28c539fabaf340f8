//! Encryption of API keys stored in module config files.
//!
//! The symmetric key comes from an environment variable and is stretched
//! with SHA-256. Sealed values are `base64(nonce || ciphertext)`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::error;

const NONCE_LEN: usize = 12;

#[derive(Debug, PartialEq, Eq)]
pub enum SecretError {
    Encoding,
    TooShort,
    Decrypt,
    Encrypt,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding => write!(f, "sealed value is not valid base64"),
            Self::TooShort => write!(f, "sealed value is truncated"),
            Self::Decrypt => write!(f, "decryption failed (wrong key or corrupted value)"),
            Self::Encrypt => write!(f, "encryption failed"),
        }
    }
}

impl std::error::Error for SecretError {}

pub struct SecretBox {
    cipher: ChaCha20Poly1305,
}

impl SecretBox {
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        Self { cipher: ChaCha20Poly1305::new(Key::from_slice(&digest)) }
    }

    /// Build from an environment variable. Missing or empty → `None`.
    pub fn from_env(var: &str) -> Option<Self> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Some(Self::new(value.trim())),
            _ => {
                error!("🔐 {var} is not set, encrypted key storage is disabled");
                None
            }
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    pub fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let raw = STANDARD.decode(sealed.trim()).map_err(|_| SecretError::Encoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(SecretError::TooShort);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decrypt)?;
        String::from_utf8(plain).map_err(|_| SecretError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let sb = SecretBox::new("hunter2");
        let sealed = sb.seal("AIza-secret").unwrap();
        assert_ne!(sealed, "AIza-secret");
        assert_eq!(sb.open(&sealed).unwrap(), "AIza-secret");
    }

    #[test]
    fn test_nonce_differs_between_seals() {
        let sb = SecretBox::new("hunter2");
        assert_ne!(sb.seal("same").unwrap(), sb.seal("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SecretBox::new("right").seal("value").unwrap();
        assert_eq!(SecretBox::new("wrong").open(&sealed), Err(SecretError::Decrypt));
    }

    #[test]
    fn test_garbage_input() {
        let sb = SecretBox::new("k");
        assert_eq!(sb.open("***"), Err(SecretError::Encoding));
        assert_eq!(sb.open("AAAA"), Err(SecretError::TooShort));
    }
}
