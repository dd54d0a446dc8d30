//! AES-256-GCM-SIV wrapper used wherever session data must protect itself.
//!
//! GCM-SIV tolerates nonce reuse, so stores that rewrite the same slot on every save do not need
//! nonce bookkeeping across processes. A random nonce is still drawn per message and prepended to
//! the ciphertext.

use std::{fmt, sync::Arc};

use aes_gcm_siv::{
    Aes256GcmSiv, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore as _;

use crate::{
    error::{Error, Result},
    key::SecretKey,
};

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct Cipher {
    aead: Arc<Aes256GcmSiv>,
}

impl Cipher {
    pub fn new(key: &SecretKey) -> Self {
        let key = Key::<Aes256GcmSiv>::from_slice(key.as_bytes());
        Self {
            aead: Arc::new(Aes256GcmSiv::new(key)),
        }
    }

    /// Encrypts `plaintext`, binding it to `aad`. Returns `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| Error::Encode("cannot encrypt session".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    ///
    /// Every failure is the same opaque decode error; a wrong key and a tampered value are
    /// indistinguishable to the caller.
    pub fn decrypt(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(cannot_decode());
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        self.aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| cannot_decode())
    }
}

fn cannot_decode() -> Error {
    Error::Decode("cannot decode session".into())
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cipher(AES-256-GCM-SIV)")
    }
}
