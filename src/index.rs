use std::sync::Arc;

use axum::{debug_handler, extract::State, response::{IntoResponse, Redirect, Response}, Json};
use tower_sessions::Session;

use crate::chat::{FanoutEngine, RosterEntry};
use crate::{session, AppResult};

#[debug_handler]
pub async fn index(session: Session) -> AppResult<Response> {
    if session::session_identity(&session).await?.is_some() {
        Ok(Redirect::to("/chat").into_response())
    } else {
        Ok(Redirect::to("/login").into_response())
    }
}

#[debug_handler]
pub async fn healthz() -> &'static str {
    "ok"
}

#[debug_handler(state = crate::AppState)]
pub async fn api_online(State(engine): State<Arc<FanoutEngine>>) -> Json<Vec<RosterEntry>> {
    Json(engine.roster())
}
