mod engine;
mod identity;
mod log;
mod page;
mod protocol;
mod registry;
mod ws;

pub use engine::FanoutEngine;
pub use identity::{Identity, Role};
pub use log::{Message, MessageKind, MessageLog};
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::{Connection, ConnectionRegistry, DuplicateConnection, RosterEntry};

pub(crate) use protocol::escape_html;

use axum::{extract::ws::Message as WsMessage, routing::get, Router};
use tokio::sync::mpsc;

use crate::AppState;

/// Outbound handle for one connection. Anything holding a clone can push
/// frames to that client; the connection's writer task drains the other
/// end, so pushing never blocks on the peer's socket.
pub type ConnectionSender = mpsc::UnboundedSender<WsMessage>;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(page::chat_page))
        .route("/ws", get(ws::chat_ws))
}
