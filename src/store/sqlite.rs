//! SQLite store over an `sqlx` pool.
//!
//! The pool holds a single connection, which serializes every statement, including the
//! background sweep, through one writer. Timestamps are unix seconds; `expire_at` is rounded
//! up so a row never lapses before its max-age has passed.

use std::{fmt, str::FromStr as _, sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    cipher::Cipher,
    clock::{self, Clock},
    codec::{Codec, SessionMap},
    error::{Error, Result},
    store::{SessionStore, Sealer, backend, ensure_valid, key_or_new},
};

pub const DEFAULT_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(10 * 60);

const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS sessions (
    session_key   TEXT PRIMARY KEY NOT NULL,
    session_value TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    expire_at     INTEGER NOT NULL
)";

const INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS sessions_expire_at_idx ON sessions (expire_at)";

const UPSERT_SQL: &str = "\
INSERT INTO sessions (session_key, session_value, created_at, expire_at)
VALUES (?, ?, ?, ?)
ON CONFLICT (session_key) DO UPDATE SET
    session_value = excluded.session_value,
    expire_at = excluded.expire_at";

const SELECT_SQL: &str =
    "SELECT session_value FROM sessions WHERE session_key = ? AND expire_at > ?";

const DELETE_SQL: &str = "DELETE FROM sessions WHERE session_key = ?";

const EXPIRE_SQL: &str = "DELETE FROM sessions WHERE expire_at <= ?";

#[derive(Default)]
struct Sweeper {
    shutdown: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    sealer: Sealer,
    clock: Arc<dyn Clock>,
    sweeper: Arc<Sweeper>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `path` and applies the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// A private in-memory database that lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(backend)?;
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|err| Error::Backend(format!("open sqlite: {err}")))?;

        let store = Self {
            pool,
            sealer: Sealer::default(),
            clock: clock::system(),
            sweeper: Arc::default(),
        };
        store.migrate().await?;
        Ok(store)
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
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    async fn migrate(&self) -> Result<()> {
        for sql in [SCHEMA_SQL, INDEX_SQL] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|err| Error::Backend(format!("migrate sqlite: {err}")))?;
        }
        Ok(())
    }

    /// Deletes every row that expired at or before `now` and returns how many were removed.
    pub async fn expire_sessions(&self, now: OffsetDateTime) -> Result<u64> {
        expire(&self.pool, now).await
    }

    /// Spawns the periodic sweep. It stops when `shutdown` fires or the store is closed.
    pub fn start_sweeper(&self, every: StdDuration, shutdown: CancellationToken) {
        let pool = self.pool.clone();
        let clock = self.clock.clone();
        let stop = self.sweeper.shutdown.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match expire(&pool, clock.now()).await {
                            Ok(0) => {}
                            Ok(removed) => {
                                tracing::debug!(removed, "sqlite session sweep removed rows");
                            }
                            Err(err) => tracing::warn!(err = %err, "sqlite session sweep failed"),
                        }
                    }
                }
            }
        });

        let mut slot = self
            .sweeper
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }
}

fn expire_at(now: OffsetDateTime, max_age: Duration) -> i64 {
    let deadline = now + max_age;
    deadline.unix_timestamp() + i64::from(deadline.nanosecond() > 0)
}

async fn expire(pool: &SqlitePool, now: OffsetDateTime) -> Result<u64> {
    let result = sqlx::query(EXPIRE_SQL)
        .bind(now.unix_timestamp())
        .execute(pool)
        .await
        .map_err(backend)?;
    Ok(result.rows_affected())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        let key = key_or_new(key);
        let value = STANDARD.encode(self.sealer.seal(&key, session)?);
        let now = self.clock.now();

        sqlx::query(UPSERT_SQL)
            .bind(&key)
            .bind(value)
            .bind(now.unix_timestamp())
            .bind(expire_at(now, max_age))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(key)
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        ensure_valid(key)?;

        let value: Option<String> = sqlx::query_scalar(SELECT_SQL)
            .bind(key)
            .bind(self.clock.now().unix_timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let value = value.ok_or(Error::NotFound)?;

        let bytes = STANDARD
            .decode(value)
            .map_err(|_| Error::Decode("cannot decode session".into()))?;
        self.sealer.open(key, &bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        ensure_valid(key)?;

        sqlx::query(DELETE_SQL)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sweeper.shutdown.cancel();

        let task = self
            .sweeper
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task
            && let Err(err) = task.await
            && !err.is_cancelled()
        {
            tracing::warn!(err = %err, "sqlite session sweeper panicked");
        }

        self.pool.close().await;
        Ok(())
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("sealer", &self.sealer)
            .finish_non_exhaustive()
    }
}
