// Tests for session lifetime: backends honour max-age, and the layer treats expired sessions as
// absent.
mod common;

use axum::body::Body;
use http::{Request, header};
use time::Duration;
use tower::{ServiceBuilder, ServiceExt as _};

use tower_sessions_vault::{
    CookieStore, Error, MemoryStore, SecretKey, SessionConfig, SessionMap, SessionStore, Value,
    clock::MockClock,
};

fn wobble() -> SessionMap {
    let mut values = SessionMap::new();
    values.insert("name".to_string(), Value::String("wobble".to_string()));
    values
}

async fn assert_lifetime(store: &dyn SessionStore, clock: &MockClock) {
    let key = store
        .write("", &wobble(), Duration::hours(1))
        .await
        .expect("session writes");

    let values = store.read(&key).await.expect("fresh session reads");
    assert_eq!(values, wobble());

    clock.advance(Duration::minutes(59));
    assert!(store.read(&key).await.is_ok());

    clock.advance(Duration::hours(2));
    let err = store.read(&key).await.expect_err("expired session is gone");
    assert!(err.is_recoverable());
    assert!(matches!(err, Error::NotFound | Error::Expired), "{err}");
}

#[tokio::test]
async fn cookie_store_expires_sessions() {
    // Exercise: write a one-hour session, read it inside and after its lifetime.
    // Expectation: readable at 59 minutes, gone after two more hours.
    let clock = MockClock::default();
    let store = CookieStore::new(&SecretKey::generate()).with_clock(clock.clone());

    assert_lifetime(&store, &clock).await;
}

#[tokio::test]
async fn memory_store_expires_sessions() {
    // Exercise: same lifetime scenario against the in-process store.
    // Expectation: same outcome, and a sweep reclaims the entry.
    let clock = MockClock::default();
    let store = MemoryStore::new().with_clock(clock.clone());

    assert_lifetime(&store, &clock).await;

    assert_eq!(store.sweep().await, 1);
    assert!(store.is_empty().await);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_store_expires_sessions() {
    // Exercise: same lifetime scenario against SQLite.
    // Expectation: same outcome, and the expired row can be swept.
    let clock = MockClock::default();
    let store = tower_sessions_vault::SqliteStore::in_memory()
        .await
        .expect("sqlite opens")
        .with_clock(clock.clone());

    assert_lifetime(&store, &clock).await;

    let swept = store
        .expire_sessions(time::OffsetDateTime::now_utc() + Duration::hours(4))
        .await
        .expect("sweep runs");
    assert_eq!(swept, 1);
    store.close().await.expect("store closes");
}

#[tokio::test]
async fn per_session_max_age_overrides_config() {
    // Exercise: handler shortens its own session's lifetime.
    // Expectation: cookie Max-Age reflects the override, not the configured default.
    let (_key, layer) = common::make_cookie_layer(SessionConfig::default());
    let svc = ServiceBuilder::new().layer(layer).service_fn(
        |req: Request<Body>| async move {
            let session = req
                .extensions()
                .get::<tower_sessions_vault::Session>()
                .cloned()
                .expect("request includes Session extension");
            session.insert("foo", 1).expect("session insert succeeds");
            session.set_max_age(Duration::minutes(5));
            Ok::<_, std::convert::Infallible>(http::Response::new(Body::empty()))
        },
    );

    let req = Request::builder()
        .body(Body::empty())
        .expect("request builds successfully");
    let res = svc.oneshot(req).await.expect("service call succeeds");
    let session_cookie = common::get_session_cookie(&res);

    assert_eq!(session_cookie.max_age(), Some(Duration::minutes(5)));
}

#[tokio::test]
async fn expired_cookie_reads_as_empty_session() {
    // Exercise: present a cookie after its embedded expiry has passed.
    // Expectation: the handler sees no data and the stale cookie is cleared.
    let config = SessionConfig::default();
    let (clock, layer) = common::make_clocked_cookie_layer(config);
    let writer = ServiceBuilder::new()
        .layer(layer.clone())
        .service_fn(common::handler);
    let reader = ServiceBuilder::new().layer(layer).service_fn(
        |req: Request<Body>| async move {
            let session = req
                .extensions()
                .get::<tower_sessions_vault::Session>()
                .cloned()
                .expect("request includes Session extension");
            let body = session
                .get("foo")
                .and_then(|value| value.as_i64())
                .map_or_else(|| "none".to_string(), |foo| foo.to_string());
            Ok::<_, std::convert::Infallible>(http::Response::new(Body::from(body)))
        },
    );

    let req = Request::builder()
        .body(Body::empty())
        .expect("request builds successfully");
    let res = writer.oneshot(req).await.expect("service call succeeds");
    let session_cookie = common::get_session_cookie(&res);

    let req = Request::builder()
        .header(header::COOKIE, common::cookie_header_value(&session_cookie))
        .body(Body::empty())
        .expect("request builds successfully");
    let res = reader
        .clone()
        .oneshot(req)
        .await
        .expect("service call succeeds");
    assert_eq!(common::body_string(res.into_body()).await, "42");

    clock.advance(Duration::hours(2));

    let req = Request::builder()
        .header(header::COOKIE, common::cookie_header_value(&session_cookie))
        .body(Body::empty())
        .expect("request builds successfully");
    let res = reader.oneshot(req).await.expect("service call succeeds");
    let cleared = common::get_session_cookie(&res);

    assert_eq!(cleared.value(), "");
    assert_eq!(cleared.max_age(), Some(Duration::ZERO));
    assert_eq!(common::body_string(res.into_body()).await, "none");
}
