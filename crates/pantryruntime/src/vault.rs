//! Envelope encryption for node-embedded secrets.
//!
//! Ciphertext format: `hex(iv) ":" hex(ciphertext || tag)` using AES-256-GCM
//! with a fresh random 16-byte IV per call.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use pantrycore::VaultError;
use rand::RngCore;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

type Cipher = AesGcm<Aes256, U16>;

/// Stateless encrypt/decrypt over an immutable 256-bit key.
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Cipher,
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher =
            Cipher::new_from_slice(key).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Build from a hex-encoded key (64 hex characters).
    pub fn from_hex(key_hex: &str) -> Result<Self, VaultError> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| VaultError::InvalidKey(format!("key must be hex: {}", e)))?;
        Self::new(&key)
    }

    /// Build from an optional configured key, failing if it is absent.
    pub fn from_config(key_hex: Option<&str>) -> Result<Self, VaultError> {
        match key_hex.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Self::from_hex(key),
            None => Err(VaultError::MissingKey),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption("cipher rejected input".into()))?;

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(sealed)))
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let (iv_hex, body_hex) = ciphertext
            .split_once(':')
            .ok_or_else(|| VaultError::Decryption("missing IV separator".into()))?;

        let iv = hex::decode(iv_hex)
            .map_err(|e| VaultError::Decryption(format!("IV is not hex: {}", e)))?;
        if iv.len() != IV_LEN {
            return Err(VaultError::Decryption(format!(
                "IV must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }
        let body = hex::decode(body_hex)
            .map_err(|e| VaultError::Decryption(format!("body is not hex: {}", e)))?;

        let plain = self
            .cipher
            .decrypt(GenericArray::from_slice(&iv), body.as_ref())
            .map_err(|_| VaultError::Decryption("authentication failed".into()))?;

        String::from_utf8(plain).map_err(|_| VaultError::Decryption("plaintext is not UTF-8".into()))
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialVault(<key>)")
    }
}
