use std::sync::Arc;
use std::time::Duration;

use axum::{
    debug_handler,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tower_sessions::Session;
use uuid::Uuid;

use super::engine::FanoutEngine;
use super::identity::Identity;
use super::protocol::ClientEvent;
use crate::{session, AppResult};

/// Server pings on this cadence; a connection that misses a pong for
/// `PONG_TIMEOUT` is torn down through the normal disconnect path.
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code for handshakes arriving without a logged-in session.
const CLOSE_NO_IDENTITY: u16 = 4001;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(engine): State<Arc<FanoutEngine>>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let identity = session::session_identity(&session).await?;

    Ok(match identity {
        Some(identity) => ws.on_upgrade(move |socket| run_connection(socket, engine, identity)),
        None => {
            tracing::warn!("anonymous websocket handshake rejected");
            // upgrade, close immediately, mutate nothing
            ws.on_upgrade(|mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_NO_IDENTITY,
                        reason: "login required".into(),
                    })))
                    .await;
            })
        }
    })
}

/// One actor per connection: a writer task owns the sink and drains the
/// connection's queue, the reader loop below feeds the engine, and a
/// heartbeat task watches for dead peers.
async fn run_connection(socket: WebSocket, engine: Arc<FanoutEngine>, identity: Identity) {
    let connection_id = Uuid::now_v7();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    if let Err(err) = engine.connect(connection_id, identity, tx.clone()) {
        tracing::error!(%err, "refusing connection");
        return;
    }

    let writer = tokio::spawn(writer_task(ws_sender, rx));

    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = interval(PING_INTERVAL);
        // skip the immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // writer is gone; the reader handles teardown
                break;
            }
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(%connection_id, "pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "keep-alive timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    while let Some(Ok(frame)) = ws_receiver.next().await {
        match frame {
            Message::Text(text) => {
                // malformed frames are dropped, never fatal to the socket
                let Ok(event) = serde_json::from_str::<ClientEvent>(&text) else {
                    continue;
                };
                engine.handle(connection_id, event);
            }
            Message::Ping(payload) => {
                let _ = tx.send(Message::Pong(payload));
            }
            Message::Pong(_) => {
                let _ = pong_tx.send(());
            }
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }

    writer.abort();
    heartbeat.abort();
    engine.disconnect(connection_id);
}

async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(frame) = rx.recv().await {
        if ws_sender.send(frame).await.is_err() {
            // peer is gone; the reader side tears the connection down
            break;
        }
    }
}
