//! Encrypted, expiring sessions for `tower` services.
//!
//! [`SessionManagerLayer`] loads a [`Session`] for each request from a pluggable
//! [`SessionStore`], inserts it into request extensions, and persists it once the inner service
//! has responded. Stores shipped with the crate:
//!
//! - [`CookieStore`]: the session travels in the cookie, sealed with AES-256-GCM-SIV.
//! - [`MemoryStore`]: process-local, lost on restart.
//! - `RedisStore`, `MemcacheStore`, `SqliteStore`: server-side, behind the `redis`, `memcache`
//!   and `sqlite` features.
//!
//! The layer also enforces synchronizer-token CSRF protection for unsafe methods (see
//! [`CsrfPolicy`]) and carries one-shot flash messages (see [`Session::render_data`]).
//!
//! # Security
//! Cookie-store sessions cannot be read or altered without the key, but a client can replay an
//! older cookie until it expires. Use a server-side store when revocation matters.

pub mod cipher;
pub mod clock;
pub mod codec;
mod config;
pub mod csrf;
mod error;
#[cfg(feature = "axum")]
mod extract;
pub mod flash;
pub mod key;
pub mod layer;
mod session;
mod settings;
pub mod store;
mod writer;

pub use tower_cookies::cookie::SameSite;

pub use crate::cipher::Cipher;
pub use crate::codec::{Codec, SessionMap, SessionType, Value};
pub use crate::config::{DEFAULT_COOKIE_NAME, DEFAULT_MAX_AGE, SessionConfig};
pub use crate::csrf::CsrfPolicy;
pub use crate::error::{Error, Result};
pub use crate::flash::{FlashKind, Flashes};
pub use crate::key::{KeyError, SecretKey, random_key, valid_key};
pub use crate::layer::SessionManagerLayer;
pub use crate::session::Session;
pub use crate::settings::{SettingsError, StoreSettings};
pub use crate::store::{SessionStore, cookie::CookieStore, memory::MemoryStore};

#[cfg(feature = "memcache")]
pub use crate::store::memcache::MemcacheStore;
#[cfg(feature = "redis")]
pub use crate::store::redis::RedisStore;
#[cfg(feature = "sqlite")]
pub use crate::store::sqlite::SqliteStore;
