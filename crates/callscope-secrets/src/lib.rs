//! At-rest encryption for tenant credentials.
//!
//! AES-256-GCM with a random 96-bit nonce per value and the cipher's 128-bit
//! authentication tag. Wire form is `v1:<base64(nonce || ciphertext+tag)>`,
//! so a stored value is self-describing and future key/scheme rotations can
//! bump the prefix.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

const WIRE_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret key must be 32 bytes of hex, got {0} bytes")]
    BadKeyLength(usize),

    #[error("secret key is not valid hex")]
    BadKeyEncoding,

    #[error("stored secret has an unknown format")]
    BadWireFormat,

    #[error("decryption failed (wrong key or tampered value)")]
    DecryptFailed,
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Symmetric encryptor for credential fields. Cheap to clone; the key is the
/// only state.
#[derive(Clone)]
pub struct SecretStore {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").finish_non_exhaustive()
    }
}

impl SecretStore {
    /// Build from a 64-char hex key (32 bytes).
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key = hex::decode(key_hex.trim()).map_err(|_| SecretError::BadKeyEncoding)?;
        if key.len() != 32 {
            return Err(SecretError::BadKeyLength(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| SecretError::BadKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::DecryptFailed)?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{WIRE_PREFIX}{}", BASE64.encode(payload)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let encoded = stored
            .strip_prefix(WIRE_PREFIX)
            .ok_or(SecretError::BadWireFormat)?;
        let payload = BASE64
            .decode(encoded)
            .map_err(|_| SecretError::BadWireFormat)?;
        // Nonce plus at least the GCM tag.
        if payload.len() < NONCE_LEN + 16 {
            return Err(SecretError::BadWireFormat);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::DecryptFailed)
    }

    /// True when `value` looks like one of our encrypted tokens. Used by the
    /// config merge to avoid double-encrypting values that are already stored.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(WIRE_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "6f1d0e7b3a9c5d2e8f4a6b1c7d3e9f0a2b4c6d8e0f1a3b5c7d9e1f2a4b6c8d0e";

    fn store() -> SecretStore {
        SecretStore::from_hex_key(KEY).unwrap()
    }

    #[test]
    fn round_trip() {
        let s = store();
        for plaintext in ["", "hunter2", "pbx-päßword-ünïcode", &"x".repeat(4096)] {
            let token = s.encrypt(plaintext).unwrap();
            assert!(token.starts_with("v1:"));
            assert_eq!(s.decrypt(&token).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonce_is_random_per_encryption() {
        let s = store();
        let a = s.encrypt("same input").unwrap();
        let b = s.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let s = store();
        let token = s.encrypt("secret").unwrap();
        let mut payload = BASE64.decode(&token["v1:".len()..]).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        let forged = format!("v1:{}", BASE64.encode(payload));
        assert!(matches!(
            s.decrypt(&forged),
            Err(SecretError::DecryptFailed)
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = store().encrypt("secret").unwrap();
        let other = SecretStore::from_hex_key(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .unwrap();
        assert!(other.decrypt(&token).is_err());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let s = store();
        assert!(matches!(
            s.decrypt("not-a-token"),
            Err(SecretError::BadWireFormat)
        ));
        assert!(matches!(
            s.decrypt("v1:!!!not-base64!!!"),
            Err(SecretError::BadWireFormat)
        ));
        assert!(matches!(s.decrypt("v1:AAAA"), Err(SecretError::BadWireFormat)));
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(matches!(
            SecretStore::from_hex_key("deadbeef"),
            Err(SecretError::BadKeyLength(4))
        ));
        assert!(matches!(
            SecretStore::from_hex_key("zz"),
            Err(SecretError::BadKeyEncoding)
        ));
    }

    #[test]
    fn is_encrypted_detects_wire_prefix() {
        assert!(SecretStore::is_encrypted("v1:abcd"));
        assert!(!SecretStore::is_encrypted("hunter2"));
    }
}
