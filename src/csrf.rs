//! Synchronizer-token CSRF protection.
//!
//! Under [`CsrfPolicy::PerSession`] one token lives for the whole session. Under
//! [`CsrfPolicy::PerRequest`] the token is consumed by the first unsafe request that checks it,
//! whether or not the check passes; the next rendered form mints a new one.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http::{HeaderMap, Method, header};
use serde::Deserialize;
use subtle::ConstantTimeEq as _;

use crate::key::random_key_bytes;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "_csrf_token";
pub const CSRF_TOKEN_DATA: &str = "csrf_token";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsrfPolicy {
    Disabled,
    PerRequest,
    #[default]
    PerSession,
}

/// Why an unsafe request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    NoSessionToken,
    NoRequestToken,
    Mismatch,
}

impl CsrfRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            CsrfRejection::NoSessionToken => "no token in session",
            CsrfRejection::NoRequestToken => "no token in request",
            CsrfRejection::Mismatch => "token mismatch",
        }
    }
}

impl fmt::Display for CsrfRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GET, HEAD, OPTIONS and TRACE never change state and are never checked.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

pub(crate) fn new_token() -> String {
    URL_SAFE_NO_PAD.encode(random_key_bytes())
}

/// Compares tokens without leaking where they differ.
pub fn tokens_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

pub(crate) fn verify(
    session_token: Option<&str>,
    supplied: Option<&str>,
) -> Result<(), CsrfRejection> {
    let expected = session_token
        .filter(|token| !token.is_empty())
        .ok_or(CsrfRejection::NoSessionToken)?;
    let supplied = supplied
        .filter(|token| !token.is_empty())
        .ok_or(CsrfRejection::NoRequestToken)?;

    if tokens_match(expected, supplied) {
        Ok(())
    } else {
        Err(CsrfRejection::Mismatch)
    }
}

pub(crate) fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
}

pub(crate) fn form_token(body: &[u8]) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .ok()?
        .into_iter()
        .find(|(name, _)| name == CSRF_FORM_FIELD)
        .map(|(_, value)| value)
}
