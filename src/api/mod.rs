pub mod auth;
pub mod error;
mod handlers;
mod web;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    routing::get,
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::pty::SpawnCommand;
use crate::session::SessionRegistry;

use handlers::*;

#[derive(Clone, Debug)]
pub struct AppState {
    pub sessions: SessionRegistry,
    /// Command every new session runs.
    pub command: SpawnCommand,
    /// Reconstruct and log the commands typed by read-write clients.
    pub command_log: bool,
}

/// Configuration for the HTTP/WS router.
///
/// Use `RouterConfig::default()` in tests for an ungated setup.
#[derive(Clone, Debug, Default)]
pub struct RouterConfig {
    /// `user:pass` required via HTTP Basic auth on every route but `/health`.
    pub credential: Option<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let protected = Router::new()
        .route("/ws/{*id}", get(ws_read_write))
        .route("/ws/", get(missing_session_id))
        .route("/ws-ro/{*id}", get(ws_read_only))
        .route("/ws-ro/", get(missing_session_id))
        .route("/sessions", get(session_list))
        .route("/sessions/{id}/log", get(session_log))
        .fallback(web::web_asset)
        .with_state(state);

    let protected = match config.credential {
        Some(credential) => {
            protected.layer(axum::middleware::from_fn(move |req: Request, next: Next| {
                let c = credential.clone();
                async move { auth::require_basic_auth(c, req, next).await }
            }))
        }
        None => protected,
    };

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
}
