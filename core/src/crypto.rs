//! Sealing of tenant API keys
//!
//! Keys are encrypted with AES-256-GCM under a key derived from the platform
//! master secret via scrypt over a per-blob random salt. Salt, nonce, and
//! ciphertext (with its auth tag) are packed into a single base64 blob so the
//! settings row stores one opaque string.

use crate::errors::CryptoError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use scrypt::Params;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

fn derive_key(master: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let params = Params::new(14, 8, 1, KEY_LEN)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(master.as_bytes(), salt, &params, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Seal an API key under the master secret into a single base64 blob
pub fn seal_api_key(plaintext: &str, master: &str) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let key = derive_key(master, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut packed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&salt);
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(packed))
}

/// Unseal a blob produced by [`seal_api_key`]
pub fn open_api_key(blob: &str, master: &str) -> Result<String, CryptoError> {
    let packed = BASE64
        .decode(blob)
        .map_err(|e| CryptoError::InvalidBlob(format!("base64: {}", e)))?;
    if packed.len() < SALT_LEN + NONCE_LEN + 16 {
        return Err(CryptoError::InvalidBlob("blob too short".to_string()));
    }

    let salt = &packed[..SALT_LEN];
    let nonce_bytes = &packed[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &packed[SALT_LEN + NONCE_LEN..];

    let key = derive_key(master, salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("authentication failed".to_string()))?;
    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("invalid utf-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let blob = seal_api_key("sk-tenant-key-123", "master-secret").unwrap();
        let opened = open_api_key(&blob, "master-secret").unwrap();
        assert_eq!(opened, "sk-tenant-key-123");
    }

    #[test]
    fn test_blobs_are_salted() {
        let a = seal_api_key("same-key", "master").unwrap();
        let b = seal_api_key("same-key", "master").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_master_fails() {
        let blob = seal_api_key("secret", "master-a").unwrap();
        assert!(matches!(
            open_api_key(&blob, "master-b"),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_garbage_blob_rejected() {
        assert!(matches!(
            open_api_key("not base64 at all!!!", "master"),
            Err(CryptoError::InvalidBlob(_))
        ));
        assert!(matches!(
            open_api_key("AAAA", "master"),
            Err(CryptoError::InvalidBlob(_))
        ));
    }
}
