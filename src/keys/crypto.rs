//! Cryptographic capabilities used by provider stages.
//!
//! - Ed25519 signatures keyed from certificate material
//! - AES-256-GCM key wrapping for nested document/content keys
//! - SHA-256 fingerprints

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SIGNING_LABEL: &[u8] = b"cpix-sign";
const WRAPPING_LABEL: &[u8] = b"cpix-wrap";
const NONCE_LEN: usize = 12;

/// Crypto failures. Deliberately coarse: callers map these onto pipeline
/// error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid base64: {0}")]
    Encoding(String),

    #[error("Invalid nonce length: expected 12, got {0}")]
    NonceLength(usize),

    #[error("Authenticated decryption failed")]
    Unwrap,

    #[error("Encryption failed")]
    Wrap,
}

/// A key sealed under a key-encryption key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub nonce: String,
    pub ciphertext: String,
}

fn derive(label: &[u8], material: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(material);
    hasher.finalize().into()
}

/// Compute hex SHA-256 of content.
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn signing_key(material: &[u8]) -> SigningKey {
    SigningKey::from_bytes(&derive(SIGNING_LABEL, material))
}

/// Sign `message` with the key derived from `material`; base64 output.
pub fn sign(material: &[u8], message: &[u8]) -> String {
    let signature = signing_key(material).sign(message);
    general_purpose::STANDARD.encode(signature.to_bytes())
}

/// Verify a base64 Ed25519 signature against the key derived from `material`.
pub fn verify(material: &[u8], message: &[u8], signature_base64: &str) -> bool {
    // Try standard first, then URL-safe base64
    let bytes = match general_purpose::STANDARD
        .decode(signature_base64)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(signature_base64))
    {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let signature = match Signature::from_slice(&bytes) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    signing_key(material)
        .verifying_key()
        .verify(message, &signature)
        .is_ok()
}

fn cipher(kek_material: &[u8]) -> Aes256Gcm {
    let key = derive(WRAPPING_LABEL, kek_material);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
}

/// Seal `plaintext` under the key-encryption key derived from `kek_material`.
pub fn wrap(kek_material: &[u8], plaintext: &[u8]) -> Result<WrappedKey, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher(kek_material)
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Wrap)?;

    Ok(WrappedKey {
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    })
}

/// Open a wrapped key sealed with [`wrap`].
pub fn unwrap(kek_material: &[u8], wrapped: &WrappedKey) -> Result<Vec<u8>, CryptoError> {
    let nonce = decode(&wrapped.nonce)?;
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::NonceLength(nonce.len()));
    }
    let ciphertext = decode(&wrapped.ciphertext)?;

    cipher(kek_material)
        .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| CryptoError::Unwrap)
}

pub fn encode(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn decode(value: &str) -> Result<Vec<u8>, CryptoError> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fingerprint() {
        let fp = fingerprint(b"Sky-Cert");
        assert_eq!(fp.len(), 64); // SHA256 produces 64 hex chars
        assert_eq!(fp, fingerprint(b"Sky-Cert"));
    }

    #[test]
    fn test_signature_bound_to_material() {
        let sig = sign(b"Fire-Cert", b"payload");
        assert!(verify(b"Fire-Cert", b"payload", &sig));
        assert!(!verify(b"Sky-Cert", b"payload", &sig));
        assert!(!verify(b"Fire-Cert", b"payload!", &sig));
        assert!(!verify(b"Fire-Cert", b"payload", "not base64 !!"));
    }

    #[test]
    fn test_unwrap_with_wrong_kek_fails() {
        let wrapped = wrap(b"Fire-Cert", b"Document-Key").unwrap();
        assert_eq!(unwrap(b"Fire-Cert", &wrapped).unwrap(), b"Document-Key");
        assert_eq!(unwrap(b"Sky-Cert", &wrapped), Err(CryptoError::Unwrap));
    }

    #[test]
    fn test_unwrap_rejects_short_nonce() {
        let mut wrapped = wrap(b"kek", b"secret").unwrap();
        wrapped.nonce = encode(&[0u8; 4]);
        assert_eq!(unwrap(b"kek", &wrapped), Err(CryptoError::NonceLength(4)));
    }

    proptest! {
        #[test]
        fn prop_any_ciphertext_flip_is_detected(
            key in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut wrapped = wrap(b"kek", &key).unwrap();
            let mut ciphertext = decode(&wrapped.ciphertext).unwrap();
            let at = index.index(ciphertext.len());
            ciphertext[at] ^= flip;
            wrapped.ciphertext = encode(&ciphertext);

            prop_assert_eq!(unwrap(b"kek", &wrapped), Err(CryptoError::Unwrap));
        }
    }
}
