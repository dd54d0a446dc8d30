//! In-process store for development and single-instance deployments.
//!
//! Entries are encoded on write, so handing out a session never aliases the stored copy. Expired
//! entries are ignored on read and dropped by a periodic janitor.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::{sync::RwLock, task::AbortHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{self, Clock},
    codec::{Codec, SessionMap},
    error::{Error, Result},
    store::{SessionStore, ensure_valid, key_or_new},
};

pub const DEFAULT_JANITOR_INTERVAL: StdDuration = StdDuration::from_secs(10 * 60);

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    codec: Codec,
    clock: Arc<dyn Clock>,
    janitor: Mutex<Option<AbortHandle>>,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::build(Codec::new(), clock::system())
    }

    fn build(codec: Codec, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                codec,
                clock,
                janitor: Mutex::new(None),
            }),
        }
    }

    /// Must be called before the store is shared or the janitor started.
    #[must_use]
    pub fn with_codec(self, codec: Codec) -> Self {
        Self::build(codec, self.inner.clock.clone())
    }

    #[must_use]
    pub fn with_clock(self, clock: impl Clock) -> Self {
        Self::build(self.inner.codec.clone(), Arc::new(clock))
    }

    /// Spawns a task that drops expired entries every `every` until `shutdown` fires, the store
    /// is closed or the last handle is dropped. Must be called within a tokio runtime.
    pub fn start_janitor(&self, every: StdDuration, shutdown: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let removed = MemoryStore { inner }.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "memory session janitor swept entries");
                        }
                    }
                }
            }
        });

        let mut janitor = self
            .inner
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = janitor.replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn stop_janitor(&self) {
        let handle = self
            .inner
            .janitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.janitor.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn write(&self, key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        let key = key_or_new(key);
        let entry = Entry {
            bytes: self.inner.codec.encode(session)?,
            expires_at: self.inner.clock.now() + max_age,
        };

        self.inner.entries.write().await.insert(key.clone(), entry);
        Ok(key)
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        ensure_valid(key)?;

        let entries = self.inner.entries.read().await;
        let entry = entries.get(key).ok_or(Error::NotFound)?;
        if entry.expires_at <= self.inner.clock.now() {
            return Err(Error::NotFound);
        }

        self.inner.codec.decode(&entry.bytes)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        ensure_valid(key)?;
        self.inner.entries.write().await.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stop_janitor();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{clock::MockClock, codec::Value, key::valid_key};

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new(datetime!(2024-01-01 12:00 UTC));
        (MemoryStore::new().with_clock(clock.clone()), clock)
    }

    fn wobble() -> SessionMap {
        let mut map = SessionMap::new();
        map.insert("name".into(), Value::from("wobble"));
        map
    }

    #[tokio::test]
    async fn write_mints_a_key_for_invalid_input() {
        let (store, _clock) = store();

        let key = store
            .write("not-a-key", &wobble(), Duration::hours(1))
            .await
            .expect("write succeeds");

        assert!(valid_key(&key));
        assert_eq!(store.read(&key).await.expect("read succeeds"), wobble());
    }

    #[tokio::test]
    async fn write_reuses_a_valid_key() {
        let (store, _clock) = store();
        let key = store
            .write("", &wobble(), Duration::hours(1))
            .await
            .expect("write succeeds");

        let again = store
            .write(&key, &SessionMap::new(), Duration::hours(1))
            .await
            .expect("write succeeds");

        assert_eq!(again, key);
        assert!(store.read(&key).await.expect("read succeeds").is_empty());
    }

    #[tokio::test]
    async fn read_rejects_invalid_keys() {
        let (store, _clock) = store();

        assert!(matches!(store.read("").await, Err(Error::InvalidKey)));
        assert!(matches!(store.read("../x").await, Err(Error::InvalidKey)));
        assert!(matches!(store.delete("nope").await, Err(Error::InvalidKey)));
    }

    #[tokio::test]
    async fn stored_copy_is_not_aliased() {
        let (store, _clock) = store();
        let mut session = wobble();
        let key = store
            .write("", &session, Duration::hours(1))
            .await
            .expect("write succeeds");

        session.insert("name".into(), Value::from("changed"));

        assert_eq!(store.read(&key).await.expect("read succeeds"), wobble());
    }

    #[tokio::test]
    async fn entries_expire_and_are_swept() {
        let (store, clock) = store();
        let key = store
            .write("", &wobble(), Duration::hours(1))
            .await
            .expect("write succeeds");

        clock.advance(Duration::hours(2));

        assert!(matches!(store.read(&key).await, Err(Error::NotFound)));
        assert_eq!(store.sweep().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let (store, _clock) = store();
        let key = store
            .write("", &wobble(), Duration::hours(1))
            .await
            .expect("write succeeds");

        store.delete(&key).await.expect("delete succeeds");

        assert!(matches!(store.read(&key).await, Err(Error::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_sweeps_until_closed() {
        let (store, clock) = store();
        store
            .write("", &wobble(), Duration::minutes(5))
            .await
            .expect("write succeeds");
        store.start_janitor(StdDuration::from_secs(60), CancellationToken::new());

        clock.advance(Duration::minutes(10));
        tokio::time::sleep(StdDuration::from_secs(61)).await;

        assert!(store.is_empty().await);
        store.close().await.expect("close succeeds");
    }
}
