//! The per-request session handle.
//!
//! A [`Session`] is inserted into request extensions by the session layer. Clones share state, so
//! handlers can read and write it freely; the layer persists the result once the response is
//! produced.
//!
//! Keys that start and end with `_` are reserved for internal state (CSRF token, flash queues,
//! embedded expiry) and cannot be set or removed through the public map interface.

use std::sync::{Arc, Mutex, MutexGuard};

use time::Duration;

use crate::{
    codec::{SessionMap, SessionType, Value},
    csrf,
    error::{Error, Result},
    flash::{self, FlashKind, Flashes},
};

pub const CSRF_TOKEN_KEY: &str = "_csrf_token_";
pub(crate) const EXPIRES_AT_KEY: &str = "_expires_at_";

/// Whether `key` belongs to the internal namespace.
pub fn is_reserved(key: &str) -> bool {
    key.len() >= 2 && key.starts_with('_') && key.ends_with('_')
}

#[derive(Debug, Default)]
struct State {
    values: SessionMap,
    modified: bool,
    max_age: Option<Duration>,
    cycle_key: bool,
    csrf_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<State>>,
}

impl Session {
    pub(crate) fn new(values: SessionMap, csrf_enabled: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                values,
                csrf_enabled,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if is_reserved(key) {
            return None;
        }
        self.lock().values.get(key).cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|value| value.as_str().map(str::to_string))
    }

    /// Reads a registered application type.
    pub fn get_custom<T: SessionType>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| value.to_custom())
    }

    /// Sets `key`, returning the previous value.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        if is_reserved(key) {
            return Err(Error::ReservedKey(key.to_string()));
        }

        let mut state = self.lock();
        state.modified = true;
        Ok(state.values.insert(key.to_string(), value.into()))
    }

    pub fn insert_custom<T: SessionType>(&self, key: &str, value: &T) -> Result<Option<Value>> {
        self.insert(key, Value::custom(value)?)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        if is_reserved(key) {
            return Err(Error::ReservedKey(key.to_string()));
        }

        let mut state = self.lock();
        let removed = state.values.remove(key);
        if removed.is_some() {
            state.modified = true;
        }
        Ok(removed)
    }

    /// Removes every application key. Pending flash messages and the CSRF token are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        let before = state.values.len();
        state.values.retain(|key, _| is_reserved(key));
        if state.values.len() != before {
            state.modified = true;
        }
    }

    /// True when nothing, internal state included, would be persisted.
    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    /// Application keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .values
            .keys()
            .filter(|key| !is_reserved(key))
            .cloned()
            .collect()
    }

    pub fn add_flash(&self, kind: FlashKind, msg: impl Into<String>) {
        let mut state = self.lock();
        flash::push(&mut state.values, kind, msg.into());
        state.modified = true;
    }

    pub fn add_flash_message(&self, msg: impl Into<String>) {
        self.add_flash(FlashKind::Message, msg);
    }

    pub fn add_flash_success(&self, msg: impl Into<String>) {
        self.add_flash(FlashKind::Success, msg);
    }

    pub fn add_flash_warning(&self, msg: impl Into<String>) {
        self.add_flash(FlashKind::Warning, msg);
    }

    pub fn add_flash_error(&self, msg: impl Into<String>) {
        self.add_flash(FlashKind::Error, msg);
    }

    /// Drains all four flash queues.
    pub fn take_flashes(&self) -> Flashes {
        let mut state = self.lock();
        let flashes = flash::take_all(&mut state.values);
        if !flashes.is_empty() {
            state.modified = true;
        }
        flashes
    }

    /// Returns the CSRF token, minting one if the session has none.
    pub fn csrf_token(&self) -> String {
        let mut state = self.lock();
        Self::ensure_csrf_token(&mut state)
    }

    fn ensure_csrf_token(state: &mut State) -> String {
        if let Some(token) = state.values.get(CSRF_TOKEN_KEY).and_then(Value::as_str) {
            return token.to_string();
        }

        let token = csrf::new_token();
        state
            .values
            .insert(CSRF_TOKEN_KEY.to_string(), Value::String(token.clone()));
        state.modified = true;
        token
    }

    /// Template data for one page render: all four flash queues, drained, plus `csrf_token`
    /// when CSRF protection is on.
    pub fn render_data(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut state = self.lock();
        let mut data = serde_json::Map::new();

        let flashes = flash::take_all(&mut state.values);
        if !flashes.is_empty() {
            state.modified = true;
        }
        flashes.merge_into(&mut data);

        if state.csrf_enabled {
            let token = Self::ensure_csrf_token(&mut state);
            data.insert(csrf::CSRF_TOKEN_DATA.to_string(), token.into());
        }

        data
    }

    /// Overrides the configured max-age for this session's next write.
    pub fn set_max_age(&self, max_age: Duration) {
        let mut state = self.lock();
        state.max_age = Some(max_age);
        state.modified = true;
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.lock().max_age
    }

    /// Drops the current backend entry and stores the data under a fresh key on save.
    ///
    /// Call after a privilege change such as login.
    pub fn cycle_key(&self) {
        let mut state = self.lock();
        state.cycle_key = true;
        state.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    pub(crate) fn snapshot(&self) -> SessionMap {
        self.lock().values.clone()
    }

    pub(crate) fn take_cycle_key(&self) -> bool {
        std::mem::take(&mut self.lock().cycle_key)
    }

    pub(crate) fn mark_saved(&self) {
        self.lock().modified = false;
    }

    pub(crate) fn csrf_token_value(&self) -> Option<String> {
        self.lock()
            .values
            .get(CSRF_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub(crate) fn take_csrf_token(&self) -> Option<String> {
        let mut state = self.lock();
        let token = state.values.remove(CSRF_TOKEN_KEY)?;
        state.modified = true;
        token.as_str().map(str::to_string)
    }
}
