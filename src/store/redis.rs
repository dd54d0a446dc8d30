//! Redis store over a `deadpool-redis` connection pool.
//!
//! Values are the encoded session as standard base64, written with `SET key value EX seconds`
//! so Redis itself evicts expired sessions.

use std::fmt;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::AsyncCommands as _;
use time::Duration;

use crate::{
    cipher::Cipher,
    codec::{Codec, SessionMap},
    error::{Error, Result},
    store::{SessionStore, Sealer, backend, ensure_valid, key_or_new},
};

#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    sealer: Sealer,
    key_prefix: String,
}

impl RedisStore {
    /// Creates a pool for `url`. No connection is made until the first command.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let pool = PoolConfig::from_url(url.into())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| Error::Backend(format!("create redis pool: {err}")))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            sealer: Sealer::default(),
            key_prefix: String::new(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.sealer.set_codec(codec);
        self
    }

    /// Encrypts values at rest; each value is bound to its session key.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.sealer.set_cipher(cipher);
        self
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|err| Error::Backend(format!("redis pool: {err}")))
    }
}

/// Whole seconds for `EX`, rounded up and never below one.
pub(crate) fn ttl_seconds(max_age: Duration) -> u64 {
    let secs = max_age.whole_seconds() + i64::from(max_age.subsec_nanoseconds() > 0);
    u64::try_from(secs).unwrap_or(0).max(1)
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        let key = key_or_new(key);
        let value = STANDARD.encode(self.sealer.seal(&key, session)?);

        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(self.redis_key(&key), value, ttl_seconds(max_age))
            .await
            .map_err(backend)?;

        Ok(key)
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        ensure_valid(key)?;

        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(self.redis_key(key)).await.map_err(backend)?;
        let value = value.ok_or(Error::NotFound)?;

        let bytes = STANDARD
            .decode(value)
            .map_err(|_| Error::Decode("cannot decode session".into()))?;
        self.sealer.open(key, &bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        ensure_valid(key)?;

        let mut conn = self.conn().await?;
        let _: () = conn.del(self.redis_key(key)).await.map_err(backend)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .field("sealer", &self.sealer)
            .finish_non_exhaustive()
    }
}
