use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use tower_cookies::{Cookie, Cookies};

use crate::{
    config::SessionConfig,
    error::{Error, Result},
    session::Session,
    store::SessionStore,
};

/// Carries a session between its backend and the response cookie for one request.
#[derive(Debug)]
pub(crate) struct SessionWriter {
    cookies: Cookies,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    secure: bool,
    key: Mutex<Option<String>>,
    cookie_written: AtomicBool,
    cookie_removed: AtomicBool,
}

impl SessionWriter {
    pub(crate) fn new(
        cookies: Cookies,
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
        secure: bool,
        key: Option<String>,
    ) -> Self {
        Self {
            cookies,
            store,
            config,
            secure,
            key: Mutex::new(key),
            cookie_written: AtomicBool::new(false),
            cookie_removed: AtomicBool::new(false),
        }
    }

    pub(crate) fn did_write_cookie(&self) -> bool {
        self.cookie_written.load(Ordering::Acquire)
    }

    pub(crate) fn did_remove_cookie(&self) -> bool {
        self.cookie_removed.load(Ordering::Acquire)
    }

    pub(crate) fn has_key(&self) -> bool {
        self.key.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    fn current_key(&self) -> Option<String> {
        self.key.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_key(&self) -> Option<String> {
        self.key.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub(crate) fn remove_cookie(&self) {
        let mut cookie = Cookie::new(self.config.name.clone(), "");
        self.config.apply_removal_attributes(&mut cookie);
        self.cookies.remove(cookie);
        self.cookie_removed.store(true, Ordering::Release);
    }

    async fn delete_key(&self, key: &str) {
        if let Err(err) = self.store.delete(key).await {
            if err.is_recoverable() {
                tracing::debug!(err = %err, "session delete skipped");
            } else {
                tracing::warn!(err = %err, "session delete failed");
            }
        }
    }

    /// Writes the session through the backend and sets a fresh cookie.
    pub(crate) async fn save(&self, session: &Session) -> Result<()> {
        if session.take_cycle_key()
            && let Some(old) = self.take_key()
        {
            self.delete_key(&old).await;
        }

        let values = session.snapshot();
        let max_age = session.max_age().unwrap_or(self.config.max_age);
        let key = self.current_key().unwrap_or_default();

        let value = self.store.write(&key, &values, max_age).await?;
        if value.len() > self.config.max_cookie_bytes {
            return Err(Error::Encode(format!(
                "cookie value exceeds max_cookie_bytes ({} > {})",
                value.len(),
                self.config.max_cookie_bytes
            )));
        }

        let cookie = self.config.build_cookie(value.clone(), max_age, self.secure);
        self.cookies.add(cookie);
        self.cookie_written.store(true, Ordering::Release);
        self.cookie_removed.store(false, Ordering::Release);

        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
        session.mark_saved();
        Ok(())
    }

    /// Deletes the backend entry, if any, and expires the cookie.
    pub(crate) async fn discard(&self) {
        if let Some(old) = self.take_key() {
            self.delete_key(&old).await;
        }
        self.remove_cookie();
    }

    /// Saves a non-empty session, discards an empty one.
    pub(crate) async fn persist(&self, session: &Session) -> Result<()> {
        if session.is_empty() {
            self.discard().await;
            Ok(())
        } else {
            self.save(session).await
        }
    }
}
