use axum::{debug_handler, http::{header, StatusCode}, response::{Html, IntoResponse, Response}};

use crate::AppResult;

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

#[debug_handler]
pub async fn manifest() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/manifest+json")],
        include_res!(str, "/manifest.webmanifest"),
    )
}

#[debug_handler]
pub async fn service_worker() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        include_res!(str, "/sw.js"),
    )
}

#[debug_handler]
pub async fn chat_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        include_res!(str, "/chat.js"),
    )
}

pub fn sorry(what: &str) -> AppResult<Response> {
    Ok((
        StatusCode::NOT_FOUND,
        Html(include_res!(str, "/pages/sorry.html").replace("{what}", what)),
    )
        .into_response())
}
