mod audit;
mod login;
mod logout;

pub use audit::LoginAudit;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page).post(login::login))
        .route("/logout", get(logout::logout))
        .route("/admin/logins", get(audit::login_log))
}
