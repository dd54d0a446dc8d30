//! Random keys, session key validation and operator-supplied key material.

use std::fmt;

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use rand::RngCore as _;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key is neither hex nor base64")]
    Encoding,

    #[error("expected 32-byte key, got {0} bytes")]
    Length(usize),
}

pub fn random_key_bytes() -> [u8; KEY_LEN] {
    let mut buf = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// A fresh 256-bit key as 64 lowercase hex characters.
pub fn random_key() -> String {
    hex::encode(random_key_bytes())
}

/// Whether `key` has the shape of a session lookup key: exactly 64 lowercase hex characters.
pub fn valid_key(key: &str) -> bool {
    key.len() == KEY_LEN * 2 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Decodes a hex key, failing unless it is exactly 32 bytes.
pub fn key_bytes(key: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let buf = hex::decode(key).map_err(|_| KeyError::Encoding)?;
    to_array(buf)
}

fn to_array(buf: Vec<u8>) -> Result<[u8; KEY_LEN], KeyError> {
    let len = buf.len();
    buf.try_into().map_err(|_| KeyError::Length(len))
}

/// 256-bit key material for the AEAD cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn generate() -> Self {
        Self(random_key_bytes())
    }

    /// Parses operator key material: 32 bytes as hex (either case) or base64 (standard or
    /// URL-safe, with or without padding). Passphrases are rejected.
    pub fn parse(material: &str) -> Result<Self, KeyError> {
        let material = material.trim();

        if material.len() == KEY_LEN * 2 && material.bytes().all(|b| b.is_ascii_hexdigit()) {
            return key_bytes(&material.to_ascii_lowercase()).map(Self);
        }

        [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(material).ok())
            .ok_or(KeyError::Encoding)
            .and_then(to_array)
            .map(Self)
    }

    /// Like [`SecretKey::parse`], but an empty value generates a random key. Sessions encrypted
    /// with a generated key do not survive a restart.
    pub fn from_operator(material: &str) -> Result<Self, KeyError> {
        if material.trim().is_empty() {
            tracing::warn!("no session key configured, generated a random key");
            return Ok(Self::generate());
        }
        Self::parse(material)
    }

    /// Derives a key from an arbitrary-length secret with SHA-256.
    ///
    /// This is an explicit opt-in; [`SecretKey::parse`] never hashes its input.
    pub fn derive_from(secret: &[u8]) -> Self {
        Self(Sha256::digest(secret).into())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; KEY_LEN]> for SecretKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}
