use std::net::SocketAddr;

use axum::{
    Form, Router,
    response::{Html, Redirect},
    routing::{get, post},
};
use serde::Deserialize;
use time::Duration;
use tokio_util::sync::CancellationToken;
use tower_sessions_vault::{
    Codec, CsrfPolicy, SameSite, Session, SessionConfig, SessionManagerLayer, SessionStore as _,
    StoreSettings,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Login {
    name: String,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn index(session: Session) -> Html<String> {
    let data = session.render_data();
    let csrf_token = data
        .get("csrf_token")
        .and_then(|token| token.as_str())
        .unwrap_or_default();

    let mut page = String::from("<!doctype html><title>vault demo</title>");
    for key in ["flash_success", "flash_message", "flash_warning", "flash_error"] {
        let msgs = data.get(key).and_then(|msgs| msgs.as_array());
        for msg in msgs.into_iter().flatten() {
            let msg = escape(msg.as_str().unwrap_or_default());
            page.push_str(&format!("<p class=\"{key}\">{msg}</p>"));
        }
    }

    match session.get_string("user").as_deref().map(escape) {
        Some(user) => page.push_str(&format!(
            "<p>signed in as {user}</p>\
             <form method=post action=/logout>\
             <input type=hidden name=_csrf_token value=\"{csrf_token}\">\
             <button>log out</button></form>"
        )),
        None => page.push_str(&format!(
            "<form method=post action=/login>\
             <input type=hidden name=_csrf_token value=\"{csrf_token}\">\
             <input name=name><button>log in</button></form>"
        )),
    }

    Html(page)
}

async fn login(session: Session, Form(login): Form<Login>) -> Redirect {
    // New privileges, new key.
    session.cycle_key();
    if session.insert("user", login.name.as_str()).is_ok() {
        session.add_flash_success(format!("welcome, {}", login.name));
    }
    Redirect::to("/")
}

async fn logout(session: Session) -> Redirect {
    session.clear();
    session.cycle_key();
    session.add_flash_message("signed out");
    Redirect::to("/")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_sessions_vault=debug")),
        )
        .init();

    // e.g. SESSION_STORE='{"backend":"sqlite","path":"sessions.db"}'
    let settings: StoreSettings = match std::env::var("SESSION_STORE") {
        Ok(raw) => serde_json::from_str(&raw).expect("SESSION_STORE is valid json"),
        Err(_) => StoreSettings::Memory,
    };

    let shutdown = CancellationToken::new();
    let store = settings
        .connect(Codec::new(), shutdown.clone())
        .await
        .expect("session store connects");

    let session_config = SessionConfig::default()
        // Default: "session"
        .with_name("session")
        // Default: SameSite::Lax
        .with_same_site(SameSite::Lax)
        // Default: 1 hour
        .with_max_age(Duration::hours(8))
        // Default: derived from the request scheme
        .with_secure(false)
        // Default: CsrfPolicy::PerSession
        .with_csrf(CsrfPolicy::PerSession);
    let session_layer = SessionManagerLayer::from_shared(store.clone()).with_config(session_config);

    let app = Router::new()
        .route("/", get(index))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .layer(session_layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("tcp listener binds successfully");
    let local_addr = listener.local_addr().expect("local address is available");
    tracing::info!(backend = settings.name(), "listening at http://{local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("server runs successfully");

    shutdown.cancel();
    if let Err(err) = store.close().await {
        tracing::warn!(err = %err, "session store close failed");
    }
}
