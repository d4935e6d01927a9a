use axum::{debug_handler, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use super::protocol::escape_html;
use crate::{include_res, session, AppResult};

#[debug_handler]
pub(crate) async fn chat_page(session: Session) -> AppResult<Response> {
    let Some(identity) = session::session_identity(&session).await? else {
        return Ok(Redirect::to("/login").into_response());
    };

    let body = include_res!(str, "/pages/chat.html")
        .replace("{username}", &escape_html(&identity.username))
        .replace("{role}", identity.role.as_str());

    Ok(Html(body).into_response())
}
