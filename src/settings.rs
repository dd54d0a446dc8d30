//! Startup-time backend selection.
//!
//! [`StoreSettings`] deserializes from whatever configuration format the application uses and
//! builds the configured store. Bad key material is reported here so the process can refuse to
//! start.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    codec::Codec,
    error::Error,
    key::{KeyError, SecretKey},
    store::{SessionStore, cookie::CookieStore, memory::MemoryStore},
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("session key: {0}")]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreSettings {
    /// Sessions sealed into the cookie. An empty `key` generates one at startup.
    Cookie {
        #[serde(default)]
        key: String,
    },
    Memory,
    #[cfg(feature = "redis")]
    Redis {
        url: String,
        #[serde(default)]
        key_prefix: String,
        #[serde(default)]
        encryption_key: Option<String>,
    },
    #[cfg(feature = "memcache")]
    Memcache {
        addr: String,
        #[serde(default)]
        encryption_key: Option<String>,
    },
    #[cfg(feature = "sqlite")]
    Sqlite {
        path: String,
        #[serde(default)]
        encryption_key: Option<String>,
    },
}

impl StoreSettings {
    pub fn name(&self) -> &'static str {
        match self {
            StoreSettings::Cookie { .. } => "cookie",
            StoreSettings::Memory => "memory",
            #[cfg(feature = "redis")]
            StoreSettings::Redis { .. } => "redis",
            #[cfg(feature = "memcache")]
            StoreSettings::Memcache { .. } => "memcache",
            #[cfg(feature = "sqlite")]
            StoreSettings::Sqlite { .. } => "sqlite",
        }
    }

    /// Builds the configured store. Background tasks stop when `shutdown` is cancelled.
    pub async fn connect(
        &self,
        codec: Codec,
        shutdown: CancellationToken,
    ) -> Result<Arc<dyn SessionStore>, SettingsError> {
        let store: Arc<dyn SessionStore> = match self {
            StoreSettings::Cookie { key } => {
                let key = SecretKey::from_operator(key)?;
                Arc::new(CookieStore::new(&key).with_codec(codec))
            }
            StoreSettings::Memory => {
                let store = MemoryStore::new().with_codec(codec);
                store.start_janitor(crate::store::memory::DEFAULT_JANITOR_INTERVAL, shutdown);
                Arc::new(store)
            }
            #[cfg(feature = "redis")]
            StoreSettings::Redis {
                url,
                key_prefix,
                encryption_key,
            } => {
                let cipher = cipher(encryption_key.as_deref())?;
                let mut store = crate::store::redis::RedisStore::new(url.as_str())?
                    .with_codec(codec)
                    .with_key_prefix(key_prefix.as_str());
                if let Some(cipher) = cipher {
                    store = store.with_cipher(cipher);
                }
                Arc::new(store)
            }
            #[cfg(feature = "memcache")]
            StoreSettings::Memcache {
                addr,
                encryption_key,
            } => {
                let cipher = cipher(encryption_key.as_deref())?;
                let mut store = crate::store::memcache::MemcacheStore::connect(addr.as_str())
                    .await?
                    .with_codec(codec);
                if let Some(cipher) = cipher {
                    store = store.with_cipher(cipher);
                }
                Arc::new(store)
            }
            #[cfg(feature = "sqlite")]
            StoreSettings::Sqlite {
                path,
                encryption_key,
            } => {
                let cipher = cipher(encryption_key.as_deref())?;
                let mut store = crate::store::sqlite::SqliteStore::open(path)
                    .await?
                    .with_codec(codec);
                if let Some(cipher) = cipher {
                    store = store.with_cipher(cipher);
                }
                store.start_sweeper(crate::store::sqlite::DEFAULT_SWEEP_INTERVAL, shutdown);
                Arc::new(store)
            }
        };

        tracing::info!(backend = self.name(), "session store ready");
        Ok(store)
    }
}

#[cfg_attr(
    not(any(feature = "redis", feature = "memcache", feature = "sqlite")),
    allow(dead_code)
)]
fn cipher(material: Option<&str>) -> Result<Option<crate::cipher::Cipher>, KeyError> {
    material
        .map(SecretKey::from_operator)
        .transpose()
        .map(|key| key.map(|key| crate::cipher::Cipher::new(&key)))
}
