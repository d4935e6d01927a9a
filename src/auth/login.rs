use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::auth::audit::{self, LoginAudit, Outcome};
use crate::chat::Role;
use crate::config::Config;
use crate::{include_res, session, AppResult};

pub(crate) const MAX_USERNAME_LEN: usize = 24;

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    username: String,
    gender: Option<String>,
    mod_code: Option<String>,
}

#[debug_handler]
pub(crate) async fn login_page() -> impl IntoResponse {
    Html(include_res!(str, "/pages/login.html").replace("{error}", ""))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn login(
    State(config): State<Arc<Config>>,
    State(audit): State<Arc<LoginAudit>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    session: Session,

    Form(LoginForm { username, gender, mod_code }): Form<LoginForm>,
) -> AppResult<Response> {
    let username = username.trim().to_owned();
    let gender = gender.filter(|g| !g.is_empty());
    let mod_code = mod_code.filter(|code| !code.is_empty());

    let ip = audit::client_ip(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        audit.record(&username, &ip, &user_agent, Outcome::Rejected, mod_code.as_deref());
        return Ok(Html(
            include_res!(str, "/pages/login.html")
                .replace("{error}", "Please enter a username (24 characters max)."),
        )
        .into_response());
    }

    let role = match &mod_code {
        Some(code) if *code == config.mod_code => Role::Mod,
        _ => Role::User,
    };

    session.insert(session::USERNAME, &username).await?;
    session.insert(session::ROLE, role).await?;
    if let Some(gender) = &gender {
        session.insert(session::GENDER, gender).await?;
    }

    let outcome = match role {
        Role::Mod => Outcome::Mod,
        Role::User => Outcome::User,
    };
    audit.record(&username, &ip, &user_agent, outcome, mod_code.as_deref());
    tracing::info!(%username, role = role.as_str(), %ip, "login");

    Ok(Redirect::to("/chat").into_response())
}
