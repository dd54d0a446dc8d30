//! The storage contract shared by every backend.
//!
//! A store maps an opaque session key to an encoded [`SessionMap`] that expires after a given
//! max-age. The cookie store carries the data itself, so its "key" is the sealed cookie value;
//! every other store issues 64-character hex lookup keys and keeps the data server-side.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use time::Duration;

use crate::{
    cipher::Cipher,
    codec::{Codec, SessionMap},
    error::{Error, Result},
    key::{random_key, valid_key},
};

pub mod cookie;
#[cfg(feature = "memcache")]
pub mod memcache;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[async_trait]
pub trait SessionStore: Debug + Send + Sync + 'static {
    /// Persists `session` for `max_age` and returns the key the client must present next time.
    ///
    /// Stores that issue lookup keys reuse `key` when it is well-formed and mint a new one
    /// otherwise.
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String>;

    /// Loads the session stored under `key`.
    ///
    /// Fails with [`Error::NotFound`] on a miss, [`Error::Expired`] when the data outlived its
    /// max-age, [`Error::InvalidKey`] for malformed keys and [`Error::Decode`] for data that
    /// cannot be opened.
    async fn read(&self, key: &str) -> Result<SessionMap>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Releases connections and stops background tasks.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        (**self).write(key, session, max_age).await
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        (**self).read(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Returns `key` when it is a well-formed lookup key, otherwise a fresh random one.
pub(crate) fn key_or_new(key: &str) -> String {
    if valid_key(key) {
        key.to_string()
    } else {
        random_key()
    }
}

pub(crate) fn ensure_valid(key: &str) -> Result<()> {
    if valid_key(key) {
        Ok(())
    } else {
        Err(Error::InvalidKey)
    }
}

pub(crate) fn backend<E: std::fmt::Display>(err: E) -> Error {
    Error::Backend(err.to_string())
}

/// Encodes session maps for server-side stores, optionally encrypting them at rest.
///
/// Encrypted values are bound to their lookup key, so a value copied under another key does not
/// open.
#[derive(Debug, Clone, Default)]
pub(crate) struct Sealer {
    codec: Codec,
    cipher: Option<Cipher>,
}

impl Sealer {
    pub(crate) fn set_codec(&mut self, codec: Codec) {
        self.codec = codec;
    }

    pub(crate) fn set_cipher(&mut self, cipher: Cipher) {
        self.cipher = Some(cipher);
    }

    pub(crate) fn seal(&self, key: &str, session: &SessionMap) -> Result<Vec<u8>> {
        let encoded = self.codec.encode(session)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&encoded, key.as_bytes()),
            None => Ok(encoded),
        }
    }

    pub(crate) fn open(&self, key: &str, bytes: &[u8]) -> Result<SessionMap> {
        match &self.cipher {
            Some(cipher) => self.codec.decode(&cipher.decrypt(bytes, key.as_bytes())?),
            None => self.codec.decode(bytes),
        }
    }
}
