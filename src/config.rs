use std::borrow::Cow;

use time::Duration;
use tower_cookies::Cookie;

use crate::{SameSite, csrf::CsrfPolicy};

pub const DEFAULT_COOKIE_NAME: &str = "session";
pub const DEFAULT_MAX_AGE: Duration = Duration::hours(1);
pub const DEFAULT_MAX_FORM_BYTES: usize = 64 * 1024;

/// Cookie and request-handling settings for [`SessionManagerLayer`](crate::SessionManagerLayer).
///
/// Session cookies are always `HttpOnly`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) name: Cow<'static, str>,
    pub(crate) same_site: SameSite,
    pub(crate) max_age: Duration,
    pub(crate) secure: Option<bool>,
    pub(crate) path: Cow<'static, str>,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) always_save: bool,
    pub(crate) max_cookie_bytes: usize,
    pub(crate) clear_on_decode_error: bool,
    pub(crate) csrf: CsrfPolicy,
    pub(crate) max_form_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            same_site: SameSite::Lax,
            max_age: DEFAULT_MAX_AGE,
            secure: None,
            path: "/".into(),
            domain: None,
            always_save: false,
            max_cookie_bytes: 4096,
            clear_on_decode_error: true,
            csrf: CsrfPolicy::PerSession,
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Applied to every session cookie; there is no per-request override.
    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Lifetime of a session from its last write, both in the backend and on the cookie.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Forces the `Secure` attribute on or off. By default it follows the request scheme.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    /// Rewrites every non-empty session on every response, sliding its expiry.
    #[must_use]
    pub fn with_always_save(mut self, always_save: bool) -> Self {
        self.always_save = always_save;
        self
    }

    #[must_use]
    pub fn with_max_cookie_bytes(mut self, max_cookie_bytes: usize) -> Self {
        self.max_cookie_bytes = max_cookie_bytes;
        self
    }

    #[must_use]
    pub fn with_clear_on_decode_error(mut self, clear_on_decode_error: bool) -> Self {
        self.clear_on_decode_error = clear_on_decode_error;
        self
    }

    #[must_use]
    pub fn with_csrf(mut self, csrf: CsrfPolicy) -> Self {
        self.csrf = csrf;
        self
    }

    /// Largest urlencoded body buffered while looking for the CSRF form field.
    #[must_use]
    pub fn with_max_form_bytes(mut self, max_form_bytes: usize) -> Self {
        self.max_form_bytes = max_form_bytes;
        self
    }

    pub fn csrf(&self) -> CsrfPolicy {
        self.csrf
    }

    pub(crate) fn build_cookie(
        &self,
        value: String,
        max_age: Duration,
        secure: bool,
    ) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((self.name.clone(), value))
            .http_only(true)
            .same_site(self.same_site)
            .secure(secure)
            .path(self.path.clone())
            .max_age(std::cmp::max(max_age, Duration::ZERO));

        if let Some(domain) = self.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }

    pub(crate) fn apply_removal_attributes(&self, cookie: &mut Cookie<'static>) {
        cookie.set_path(self.path.clone());
        if let Some(domain) = self.domain.clone() {
            cookie.set_domain(domain);
        }
    }
}
