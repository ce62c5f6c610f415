//! Envelope cipher for Moodle tokens stored at rest.
//!
//! Tokens are sealed with AES-256-GCM under a single process-wide key. The
//! sealed form is three dot-separated standard-base64 fields:
//! `nonce.ciphertext.tag`, with a fresh 96-bit nonce per call.

#![allow(deprecated)]

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEPARATOR: char = '.';

/// Cipher error types. None of the messages carry key or plaintext material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("sealed token is malformed: {0}")]
    Format(&'static str),
    #[error("sealed token failed integrity verification")]
    Integrity,
    #[error("encryption failed")]
    Encryption,
}

impl CipherError {
    /// Machine-readable kind used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CipherError::InvalidKeyLength(_) => "invalid_key_length",
            CipherError::Format(_) => "format_error",
            CipherError::Integrity => "integrity_error",
            CipherError::Encryption => "encryption_error",
        }
    }
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

/// Seals and opens token strings under one key.
#[derive(Clone, Debug)]
pub struct TokenCipher {
    key: CryptoKey,
}

impl TokenCipher {
    pub fn new(key: CryptoKey) -> Self {
        Self { key }
    }

    /// Build a cipher from raw key bytes, failing unless exactly 32 bytes are given.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CipherError> {
        CryptoKey::new(bytes).map(Self::new)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()))
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            STANDARD.encode(nonce),
            STANDARD.encode(&sealed),
            STANDARD.encode(tag)
        ))
    }

    /// Verify and decrypt a sealed token.
    pub fn open(&self, sealed: &str) -> Result<Zeroizing<String>, CipherError> {
        let parts: Vec<&str> = sealed.trim().split(SEPARATOR).collect();
        let [nonce_b64, ciphertext_b64, tag_b64] = parts.as_slice() else {
            return Err(CipherError::Format("expected three dot-separated parts"));
        };

        let nonce = decode_part(nonce_b64, "nonce is not valid base64")?;
        let ciphertext = decode_part(ciphertext_b64, "ciphertext is not valid base64")?;
        let tag = decode_part(tag_b64, "tag is not valid base64")?;

        if nonce.len() != NONCE_LEN {
            return Err(CipherError::Format("nonce must be 12 bytes"));
        }
        if tag.len() != TAG_LEN {
            return Err(CipherError::Format("tag must be 16 bytes"));
        }

        let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&ciphertext);
        combined.extend_from_slice(&tag);

        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(&nonce), combined.as_ref())
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|err| {
                let mut bytes = err.into_bytes();
                bytes.zeroize();
                CipherError::Format("plaintext is not valid UTF-8")
            })
    }

    /// Open with this cipher and seal again under a fresh nonce.
    pub fn reseal(&self, sealed: &str) -> Result<String, CipherError> {
        let plaintext = self.open(sealed)?;
        self.seal(&plaintext)
    }
}

fn decode_part(part: &str, reason: &'static str) -> Result<Vec<u8>, CipherError> {
    STANDARD.decode(part).map_err(|_| CipherError::Format(reason))
}

/// Returns true when `value` has the three-part sealed shape. Does not verify it.
pub fn looks_sealed(value: &str) -> bool {
    let parts: Vec<&str> = value.split(SEPARATOR).collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && STANDARD.decode(part).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::from_bytes(vec![42u8; 32]).expect("valid key")
    }

    fn flip_bit_in_part(sealed: &str, index: usize) -> String {
        let mut parts: Vec<String> = sealed.split('.').map(str::to_string).collect();
        let mut bytes = STANDARD.decode(&parts[index]).unwrap();
        bytes[0] ^= 0x01;
        parts[index] = STANDARD.encode(bytes);
        parts.join(".")
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = test_cipher();
        for plaintext in ["abc123", "", "ünïcødé token", &"x".repeat(4096)] {
            let sealed = cipher.seal(plaintext).expect("seal succeeds");
            let opened = cipher.open(&sealed).expect("open succeeds");
            assert_eq!(opened.as_str(), plaintext);
        }
    }

    #[test]
    fn test_sealing_twice_yields_different_output() {
        let cipher = test_cipher();
        let first = cipher.seal("abc123").unwrap();
        let second = cipher.seal("abc123").unwrap();

        assert_ne!(first, second);
        assert_ne!(first.split('.').next(), second.split('.').next());
        assert_eq!(cipher.open(&first).unwrap().as_str(), "abc123");
        assert_eq!(cipher.open(&second).unwrap().as_str(), "abc123");
    }

    #[test]
    fn test_sealed_output_has_three_recoverable_parts() {
        let sealed = test_cipher().seal("abc123").unwrap();
        let parts: Vec<&str> = sealed.split('.').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(STANDARD.decode(parts[0]).unwrap().len(), NONCE_LEN);
        assert_eq!(STANDARD.decode(parts[1]).unwrap().len(), "abc123".len());
        assert_eq!(STANDARD.decode(parts[2]).unwrap().len(), TAG_LEN);
        assert!(!sealed.contains("abc123"));
        assert!(looks_sealed(&sealed));
    }

    #[test]
    fn test_tampered_tag_is_integrity_error() {
        let cipher = test_cipher();
        let sealed = cipher.seal("abc123").unwrap();

        let tampered = flip_bit_in_part(&sealed, 2);
        assert_eq!(cipher.open(&tampered).unwrap_err(), CipherError::Integrity);
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_error() {
        let cipher = test_cipher();
        let sealed = cipher.seal("abc123").unwrap();

        let tampered = flip_bit_in_part(&sealed, 1);
        assert_eq!(cipher.open(&tampered).unwrap_err(), CipherError::Integrity);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let sealed = test_cipher().seal("abc123").unwrap();
        let other = TokenCipher::from_bytes(vec![7u8; 32]).unwrap();

        assert_eq!(other.open(&sealed).unwrap_err(), CipherError::Integrity);
    }

    #[test]
    fn test_malformed_tokens_are_format_errors() {
        let cipher = test_cipher();
        let sealed = cipher.seal("abc123").unwrap();
        let (nonce, rest) = sealed.split_once('.').unwrap();

        let cases = vec![
            "abc123".to_string(),
            rest.to_string(),
            format!("{sealed}.extra"),
            format!("{nonce}.!!!.AAAA"),
            format!("AAAA.{rest}"),
            format!("{nonce}.{}.AAAA", rest.split('.').next().unwrap()),
        ];

        for case in cases {
            assert!(
                matches!(cipher.open(&case), Err(CipherError::Format(_))),
                "expected format error for {case}"
            );
        }
        assert!(!looks_sealed("abc123"));
    }

    #[test]
    fn test_reseal_rotates_ciphertext() {
        let cipher = test_cipher();
        let sealed = cipher.seal("abc123").unwrap();
        let resealed = cipher.reseal(&sealed).unwrap();

        assert_ne!(sealed, resealed);
        assert_eq!(cipher.open(&resealed).unwrap().as_str(), "abc123");
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert_eq!(
            TokenCipher::from_bytes(vec![0u8; 16]).unwrap_err(),
            CipherError::InvalidKeyLength(16)
        );
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_debug_output_redacts_key() {
        let rendered = format!("{:?}", test_cipher());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("42"));
    }
}
