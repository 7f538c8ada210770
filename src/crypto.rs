//! Symmetric authenticated encryption for OAuth tokens at rest.
//!
//! Algorithm is AES-256-GCM. Each call generates a fresh 96-bit nonce; the
//! envelope is `nonce:ciphertext:authTag`, each field hex-encoded and joined
//! with `:` (the GCM tag is appended to the ciphertext by the `aead` crate,
//! so in practice this is `nonce_hex:ciphertext_plus_tag_hex`).

use aes_gcm::{
    aead::{generic_array::typenum::U12, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use log::{error, warn};
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;

/// Process-wide vault over a fixed 32-byte key.
#[derive(Clone)]
pub struct Vault {
    key: [u8; 32],
}

impl Vault {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: Option<&str>) -> Option<String> {
        let plaintext = plaintext?;
        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key is always 32 bytes");

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::Rng::fill(&mut rand::rng(), &mut nonce_bytes);
        let nonce: Nonce<U12> = nonce_bytes.into();

        let ciphertext = match cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(c) => c,
            Err(e) => {
                error!("[crypto] encryption failed: {}", e);
                return None;
            }
        };

        Some(format!("{}:{}", hex::encode(nonce_bytes), hex::encode(ciphertext)))
    }

    pub fn decrypt(&self, envelope: Option<&str>) -> Option<String> {
        let envelope = envelope?;
        let (nonce_hex, ciphertext_hex) = envelope.split_once(':')?;

        let nonce_bytes = hex::decode(nonce_hex).ok()?;
        let ciphertext = hex::decode(ciphertext_hex).ok()?;
        if nonce_bytes.len() != NONCE_LEN {
            warn!("[crypto] malformed envelope: nonce length {}", nonce_bytes.len());
            return None;
        }
        let nonce: Nonce<U12> = <[u8; NONCE_LEN]>::try_from(nonce_bytes.as_slice())
            .ok()?
            .into();

        let cipher = Aes256Gcm::new_from_slice(&self.key).expect("key is always 32 bytes");
        match cipher.decrypt(&nonce, ciphertext.as_slice()) {
            Ok(plain) => String::from_utf8(plain).ok(),
            Err(_) => {
                error!("[crypto] decryption failed: wrong key or tampered envelope");
                None
            }
        }
    }
}

/// Parses `ENCRYPTION_KEY` into a 32-byte key. A secret whose byte length is
/// exactly 32 is used directly; any other length is hashed with SHA-256 and
/// the digest used as the key (documented fallback).
pub fn load_key(raw: &str) -> [u8; 32] {
    let bytes = raw.as_bytes();
    if bytes.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        return key;
    }

    warn!(
        "[crypto] ENCRYPTION_KEY is {} bytes, not 32; deriving key via SHA-256",
        bytes.len()
    );
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new(load_key("0123456789abcdef0123456789abcdef"))
    }

    #[test]
    fn roundtrip() {
        let vault = test_vault();
        let encrypted = vault.encrypt(Some("super-secret-token")).unwrap();
        assert_ne!(encrypted, "super-secret-token");
        assert_eq!(vault.decrypt(Some(&encrypted)).unwrap(), "super-secret-token");
    }

    #[test]
    fn none_in_none_out() {
        let vault = test_vault();
        assert_eq!(vault.encrypt(None), None);
        assert_eq!(vault.decrypt(None), None);
    }

    #[test]
    fn distinct_nonces() {
        let vault = test_vault();
        let a = vault.encrypt(Some("same")).unwrap();
        let b = vault.encrypt(Some("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_envelope_fails_closed() {
        let vault = test_vault();
        let encrypted = vault.encrypt(Some("token")).unwrap();
        let mut tampered = encrypted.clone();
        tampered.push('0');
        assert_eq!(vault.decrypt(Some(&tampered)), None);
    }

    #[test]
    fn key_derivation_fallback_is_stable() {
        let a = load_key("too-short");
        let b = load_key("too-short");
        assert_eq!(a, b);
    }

    #[test]
    fn exact_32_byte_secret_is_used_directly() {
        let key = load_key("0123456789abcdef0123456789abcdef");
        assert_eq!(&key, b"0123456789abcdef0123456789abcdef");
    }
}
