#![allow(dead_code)]

// Shared helpers for integration tests.
//
// These helpers use `tower_cookies::Cookie` parsing/encoding to match what the middleware emits
// in `Set-Cookie` and what browsers send back in `Cookie`.
use std::convert::Infallible;

use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use tower_cookies::Cookie;
use tower_sessions_vault::{
    CookieStore, MemoryStore, SecretKey, Session, SessionConfig, SessionManagerLayer,
    clock::MockClock,
};

pub async fn body_string(body: Body) -> String {
    // Collect an Axum body into a UTF-8 string for assertions.
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Basic handler used by many tests: write a single key into the session.
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    session.insert("foo", 42).expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub async fn noop_handler(_: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Handler that does not access the session at all.
    Ok(Response::new(Body::empty()))
}

pub fn make_cookie_layer(config: SessionConfig) -> (SecretKey, SessionManagerLayer) {
    // Cookie-store layer plus its key, for tests that open cookie values themselves.
    let key = SecretKey::generate();
    let layer = SessionManagerLayer::new(CookieStore::new(&key)).with_config(config);
    (key, layer)
}

pub fn make_memory_layer(config: SessionConfig) -> (MemoryStore, SessionManagerLayer) {
    let store = MemoryStore::new();
    let layer = SessionManagerLayer::new(store.clone()).with_config(config);
    (store, layer)
}

pub fn make_clocked_cookie_layer(config: SessionConfig) -> (MockClock, SessionManagerLayer) {
    let clock = MockClock::default();
    let store = CookieStore::new(&SecretKey::generate()).with_clock(clock.clone());
    (clock, SessionManagerLayer::new(store).with_config(config))
}

pub fn get_session_cookie(res: &Response<Body>) -> Cookie<'static> {
    // Convenience: parse the session cookie from a response.
    get_session_cookie_from_headers(res.headers())
}

pub fn get_session_cookie_from_headers(headers: &HeaderMap) -> Cookie<'static> {
    // Parse the `Set-Cookie` header into a `Cookie` structure.
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("response includes set-cookie header");
    let set_cookie = set_cookie
        .to_str()
        .expect("set-cookie header is valid utf-8");
    Cookie::parse_encoded(set_cookie)
        .expect("set-cookie parses successfully")
        .into_owned()
}

pub fn cookie_header_value(cookie: &Cookie<'_>) -> String {
    // Encode a cookie for use in a `Cookie` request header.
    cookie.encoded().to_string()
}

pub fn has_set_cookie(res: &Response<Body>) -> bool {
    res.headers().get(header::SET_COOKIE).is_some()
}
