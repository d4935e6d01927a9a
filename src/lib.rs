pub mod auth;
pub mod chat;
pub mod config;
pub mod index;
pub mod res;
pub mod session;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

use auth::LoginAudit;
use chat::FanoutEngine;
use config::Config;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub engine: Arc<FanoutEngine>,
    pub audit: Arc<LoginAudit>,
    pub config: Arc<Config>,
}

pub fn app(state: AppState) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(2)));

    Router::new()
        .route("/", get(index::index))
        .route("/healthz", get(index::healthz))
        .route("/api/online", get(index::api_online))
        .route("/manifest.webmanifest", get(res::manifest))
        .route("/sw.js", get(res::service_worker))
        .route("/chat.js", get(res::chat_js))

        .merge(auth::router())
        .nest("/chat", chat::router())

        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
}

pub type AppResult<T> = Result<T, AppError>;
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
