use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header, uri::Scheme};
use http_body::Body;
use http_body_util::{BodyExt as _, Limited};
use rand::RngCore as _;
use tower_cookies::{Cookie, CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;

use crate::{
    codec::SessionMap,
    config::SessionConfig,
    csrf::{self, CsrfPolicy},
    session::Session,
    store::SessionStore,
    writer::SessionWriter,
};

/// Header whose value, when present, is used as the error ID in error responses and logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionManagerLayer {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManagerLayer {
    pub fn new(store: impl SessionStore) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Uses a store that is already shared, e.g. one built by
    /// [`StoreSettings::connect`](crate::StoreSettings::connect).
    pub fn from_shared(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionManager<S> {
    inner: S,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl<S> Layer<S> for SessionManagerLayer {
    type Service = CookieManager<SessionManager<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(SessionManager {
            inner,
            store: self.store.clone(),
            config: self.config.clone(),
        })
    }
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for SessionManager<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Body + From<Bytes> + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<BoxError>,
    ResBody: From<String> + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let store = self.store.clone();
        let config = self.config.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let err_id = error_id(req.headers());

            let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
                tracing::error!(err_id = %err_id, "cookie manager missing from request");
                return Ok(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &err_id,
                    "internal server error",
                ));
            };

            let secure = config.secure.unwrap_or_else(|| is_https(&req));
            let session_cookie = cookies.get(&config.name).map(Cookie::into_owned);
            let mut clear_cookie = false;
            let mut backend_failed = false;

            let (key, values) = match session_cookie.as_ref() {
                Some(cookie) => match store.read(cookie.value()).await {
                    Ok(values) => (Some(cookie.value().to_string()), values),
                    Err(err) if err.is_recoverable() => {
                        tracing::debug!(err = %err, "session load failed");
                        clear_cookie = config.clear_on_decode_error;
                        (None, SessionMap::new())
                    }
                    Err(err) => {
                        tracing::warn!(err = %err, "session backend read failed");
                        backend_failed = true;
                        (None, SessionMap::new())
                    }
                },
                None => (None, SessionMap::new()),
            };

            let writer = SessionWriter::new(cookies, store, config.clone(), secure, key);
            if clear_cookie {
                writer.remove_cookie();
            }

            let session = Session::new(values, config.csrf != CsrfPolicy::Disabled);
            req.extensions_mut().insert(session.clone());

            let req = match check_csrf(req, &session, &writer, &config, &err_id).await {
                Ok(req) => req,
                Err(res) => return Ok(res),
            };

            let req_method = req.method().clone();
            let req_path = req.uri().path().to_string();

            let res = inner.call(req).await?;

            if res.status().is_server_error() {
                return Ok(res);
            }

            if session.is_empty() {
                let had_cookie = session_cookie.is_some() && !backend_failed;
                if writer.has_key() || (had_cookie && !writer.did_remove_cookie()) {
                    writer.discard().await;
                }
                return Ok(res);
            }

            if (session.is_modified() || (config.always_save && !writer.did_write_cookie()))
                && let Err(err) = writer.save(&session).await
            {
                tracing::error!(
                    err = %err,
                    err_id = %err_id,
                    req_method = %req_method,
                    req_path = %req_path,
                    "session save failed"
                );
                return Ok(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &err_id,
                    "internal server error",
                ));
            }

            Ok(res)
        })
    }
}

/// Runs the CSRF check for unsafe methods, handing the request back on success.
async fn check_csrf<ReqBody, ResBody>(
    req: Request<ReqBody>,
    session: &Session,
    writer: &SessionWriter,
    config: &SessionConfig,
    err_id: &str,
) -> Result<Request<ReqBody>, Response<ResBody>>
where
    ReqBody: Body + From<Bytes>,
    ReqBody::Error: Into<BoxError>,
    ResBody: From<String>,
{
    if config.csrf == CsrfPolicy::Disabled || csrf::is_safe_method(req.method()) {
        return Ok(req);
    }

    let session_token = match config.csrf {
        CsrfPolicy::PerRequest => session.take_csrf_token(),
        _ => session.csrf_token_value(),
    };

    let (req, supplied) = supplied_token(req, config.max_form_bytes).await;

    // A consumed per-request token is persisted before the handler runs.
    if config.csrf == CsrfPolicy::PerRequest
        && session_token.is_some()
        && let Err(err) = writer.persist(session).await
    {
        tracing::error!(
            err = %err,
            err_id = %err_id,
            req_method = %req.method(),
            req_path = %req.uri().path(),
            "session save failed"
        );
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            err_id,
            "internal server error",
        ));
    }

    match csrf::verify(session_token.as_deref(), supplied.as_deref()) {
        Ok(()) => Ok(req),
        Err(reason) => {
            tracing::warn!(
                csrf.reason = %reason,
                err_id = %err_id,
                req_method = %req.method(),
                req_path = %req.uri().path(),
                "csrf check failed"
            );
            Err(error_response(
                StatusCode::BAD_REQUEST,
                err_id,
                "invalid request",
            ))
        }
    }
}

/// Finds the submitted token in the header, or else in a urlencoded form body. A buffered body
/// is put back into the request unchanged.
async fn supplied_token<B>(req: Request<B>, limit: usize) -> (Request<B>, Option<String>)
where
    B: Body + From<Bytes>,
    B::Error: Into<BoxError>,
{
    if let Some(token) = csrf::header_token(req.headers()) {
        return (req, Some(token));
    }
    if !csrf::is_form(req.headers()) {
        return (req, None);
    }

    let (parts, body) = req.into_parts();
    match Limited::new(body, limit).collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let token = csrf::form_token(&bytes);
            (Request::from_parts(parts, B::from(bytes)), token)
        }
        Err(err) => {
            tracing::debug!(err = %err, "form body unreadable");
            (Request::from_parts(parts, B::from(Bytes::new())), None)
        }
    }
}

fn is_https<B>(req: &Request<B>) -> bool {
    if req.uri().scheme() == Some(&Scheme::HTTPS) {
        return true;
    }

    req.headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

/// The request's `x-request-id` when usable, otherwise eight random uppercase hex digits.
pub(crate) fn error_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 64 && id.bytes().all(|b| b.is_ascii_graphic()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let mut buf = [0u8; 4];
            rand::rng().fill_bytes(&mut buf);
            hex::encode_upper(buf)
        })
}

fn error_response<B: From<String>>(status: StatusCode, err_id: &str, msg: &str) -> Response<B> {
    let mut res = Response::new(B::from(format!("[{err_id}] {msg}")));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_header_is_used_when_sane() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));

        assert_eq!(error_id(&headers), "req-42");
    }

    #[test]
    fn random_error_ids_are_uppercase_hex() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("has space"));

        let id = error_id(&headers);

        assert_eq!(id.len(), 8);
        assert!(id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F')));
        assert_ne!(error_id(&HeaderMap::new()), error_id(&HeaderMap::new()));
    }

    #[test]
    fn https_detection() {
        let plain = Request::builder()
            .uri("http://example.com/")
            .body(())
            .expect("request builds successfully");
        let tls = Request::builder()
            .uri("https://example.com/")
            .body(())
            .expect("request builds successfully");
        let proxied = Request::builder()
            .uri("/")
            .header("x-forwarded-proto", "HTTPS, http")
            .body(())
            .expect("request builds successfully");

        assert!(!is_https(&plain));
        assert!(is_https(&tls));
        assert!(is_https(&proxied));
    }

    #[test]
    fn error_body_carries_the_id() {
        let res: Response<String> = error_response(StatusCode::BAD_REQUEST, "ABCD1234", "invalid request");

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(res.body(), "[ABCD1234] invalid request");
    }
}
