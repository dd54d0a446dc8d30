//! memcached store speaking the ASCII protocol through `memcache-async`.
//!
//! memcached reads an expiration above thirty days as an absolute unix timestamp rather than a
//! relative offset. [`memcache_expiration`] performs that conversion; passing long max-ages
//! through unchanged would make such sessions expire at once.

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use memcache_async::ascii::Protocol;
use time::{Duration, OffsetDateTime};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt as _};

use crate::{
    cipher::Cipher,
    clock::{self, Clock},
    codec::{Codec, SessionMap},
    error::{Error, Result},
    store::{SessionStore, Sealer, backend, ensure_valid, key_or_new},
};

/// Largest expiration memcached treats as relative seconds.
pub const RELATIVE_EXPIRATION_LIMIT: i64 = 30 * 24 * 60 * 60;

/// Converts a max-age into memcached's expiration field.
///
/// Returns relative seconds (at least one, since zero means "never") when `max_age` fits in
/// thirty days, otherwise the absolute unix time `now + max_age`.
pub fn memcache_expiration(max_age: Duration, now: OffsetDateTime) -> u32 {
    let secs = max_age.whole_seconds().max(1);
    let field = if secs > RELATIVE_EXPIRATION_LIMIT {
        (now + max_age).unix_timestamp()
    } else {
        secs
    };
    u32::try_from(field).unwrap_or(u32::MAX)
}

/// The memcached commands the store needs.
#[async_trait]
pub trait MemcacheTransport: Send + Sync + 'static {
    /// `Ok(None)` on a miss.
    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], expiration: u32) -> io::Result<()>;

    async fn delete(&self, key: &str) -> io::Result<()>;
}

type Connection = Protocol<Compat<TcpStream>>;

/// Idle connections kept around between commands.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// A small pool of TCP connections to one memcached server.
///
/// A connection goes back to the pool only after its command has completed. One whose command
/// failed, or whose future was dropped part way through, is closed instead, so a late reply can
/// never be read by the next command.
pub struct TcpTransport {
    addr: String,
    idle: std::sync::Mutex<Vec<Connection>>,
}

impl TcpTransport {
    /// Opens the first connection, failing fast when the server is unreachable.
    pub async fn connect(addr: impl Into<String>) -> io::Result<Self> {
        let addr = addr.into();
        let conn = open(&addr).await?;
        Ok(Self {
            addr,
            idle: std::sync::Mutex::new(vec![conn]),
        })
    }

    async fn checkout(&self) -> io::Result<Connection> {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        match idle {
            Some(conn) => Ok(conn),
            None => open(&self.addr).await,
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

async fn open(addr: &str) -> io::Result<Connection> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(Protocol::new(stream.compat()))
}

#[async_trait]
impl MemcacheTransport for TcpTransport {
    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let mut conn = self.checkout().await?;
        // `get_multi` keys the reply by the name in each VALUE line.
        let mut values = conn.get_multi(&[key]).await?;
        let value = values.remove(key);
        if !values.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "memcached answered for a key that was not requested",
            ));
        }
        self.checkin(conn);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], expiration: u32) -> io::Result<()> {
        let mut conn = self.checkout().await?;
        conn.set(&key, value, expiration).await?;
        self.checkin(conn);
        Ok(())
    }

    async fn delete(&self, key: &str) -> io::Result<()> {
        let mut conn = self.checkout().await?;
        conn.delete(&key).await?;
        self.checkin(conn);
        Ok(())
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct MemcacheStore {
    transport: Arc<dyn MemcacheTransport>,
    sealer: Sealer,
    clock: Arc<dyn Clock>,
}

impl MemcacheStore {
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let transport = TcpTransport::connect(addr)
            .await
            .map_err(|err| Error::Backend(format!("connect to memcached: {err}")))?;
        Ok(Self::with_transport(transport))
    }

    pub fn with_transport(transport: impl MemcacheTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            sealer: Sealer::default(),
            clock: clock::system(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.sealer.set_codec(codec);
        self
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.sealer.set_cipher(cipher);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl SessionStore for MemcacheStore {
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        let key = key_or_new(key);
        let value = STANDARD.encode(self.sealer.seal(&key, session)?);
        let expiration = memcache_expiration(max_age, self.clock.now());

        self.transport
            .set(&key, value.as_bytes(), expiration)
            .await
            .map_err(backend)?;
        Ok(key)
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        ensure_valid(key)?;

        let value = match self.transport.get(key).await.map_err(backend)? {
            Some(value) if !value.is_empty() => value,
            _ => return Err(Error::NotFound),
        };

        let bytes = STANDARD
            .decode(value)
            .map_err(|_| Error::Decode("cannot decode session".into()))?;
        self.sealer.open(key, &bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        ensure_valid(key)?;
        self.transport.delete(key).await.map_err(backend)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for MemcacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcacheStore")
            .field("sealer", &self.sealer)
            .finish_non_exhaustive()
    }
}
