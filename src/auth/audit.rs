//! In-memory trail of login attempts, viewable behind a separate
//! credential. Nothing here persists; the trail is a bounded ring that
//! resets with the process, like the rest of the server's state.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    debug_handler,
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::chat::escape_html;
use crate::config::Config;
use crate::{include_res, res, AppResult};

const AUDIT_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    User,
    Mod,
    Rejected,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Mod => "mod",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub ts: OffsetDateTime,
    pub username: String,
    pub ip: String,
    pub user_agent: String,
    pub outcome: Outcome,
    /// The raw moderator code never enters the trail.
    pub mod_code_masked: Option<String>,
}

#[derive(Default)]
pub struct LoginAudit {
    entries: Mutex<VecDeque<LoginAttempt>>,
}

impl LoginAudit {
    pub fn record(
        &self,
        username: &str,
        ip: &str,
        user_agent: &str,
        outcome: Outcome,
        mod_code: Option<&str>,
    ) {
        let attempt = LoginAttempt {
            ts: OffsetDateTime::now_utc(),
            username: username.to_owned(),
            ip: ip.to_owned(),
            user_agent: user_agent.to_owned(),
            outcome,
            mod_code_masked: mod_code.map(mask_code),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push_back(attempt);
        if entries.len() > AUDIT_CAP {
            entries.pop_front();
        }
    }

    /// Newest-first snapshot for the admin page.
    pub fn recent(&self) -> Vec<LoginAttempt> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().rev().cloned().collect()
    }
}

fn mask_code(code: &str) -> String {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => format!("{first}{}", "*".repeat(chars.count())),
        None => String::new(),
    }
}

/// Client address for the trail, trusting `X-Forwarded-For` when a proxy
/// set it.
pub(crate) fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_owned())
        .unwrap_or_else(|| peer.ip().to_string())
}

#[derive(Deserialize)]
pub(crate) struct LoginLogQuery {
    code: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn login_log(
    State(config): State<Arc<Config>>,
    State(audit): State<Arc<LoginAudit>>,
    Query(LoginLogQuery { code }): Query<LoginLogQuery>,
) -> AppResult<Response> {
    let Some(admin_code) = &config.admin_code else {
        return res::sorry("login log");
    };
    if code.as_deref() != Some(admin_code.as_str()) {
        return res::sorry("login log");
    }

    let mut rows = String::new();
    for attempt in audit.recent() {
        rows += &include_res!(str, "/pages/login_log_row.html")
            .replace("{ts}", &attempt.ts.format(&Rfc3339).unwrap_or_default())
            .replace("{username}", &escape_html(&attempt.username))
            .replace("{ip}", &escape_html(&attempt.ip))
            .replace("{user_agent}", &escape_html(&attempt.user_agent))
            .replace("{outcome}", attempt.outcome.as_str())
            .replace("{mod_code}", &escape_html(attempt.mod_code_masked.as_deref().unwrap_or("-")));
    }

    let body = include_res!(str, "/pages/login_log.html").replace("{rows}", &rows);
    Ok(Html(body).into_response())
}
