//! The event-driven core. Every handler runs as one atomic unit against
//! the registry and log, computes its recipient set while still holding
//! the lock, and pushes frames only after releasing it — pushes go to
//! per-connection queues, so a slow peer never stalls the room.

use std::sync::{Mutex, MutexGuard};

use axum::extract::ws::Message as WsMessage;
use time::OffsetDateTime;
use uuid::Uuid;

use super::identity::{Identity, Role};
use super::log::{Message, MessageLog};
use super::protocol::{clean_text, ClientEvent, ServerEvent};
use super::registry::{ConnectionRegistry, DuplicateConnection, RosterEntry};
use super::ConnectionSender;

/// Registry and log share one exclusive-access domain.
struct Shared {
    registry: ConnectionRegistry,
    log: MessageLog,
}

pub struct FanoutEngine {
    inner: Mutex<Shared>,
    max_text_len: usize,
}

impl FanoutEngine {
    pub fn new(history_cap: usize, max_text_len: usize) -> Self {
        Self {
            inner: Mutex::new(Shared {
                registry: ConnectionRegistry::default(),
                log: MessageLog::new(history_cap),
            }),
            max_text_len,
        }
    }

    // Handlers never unwind while the maps are half-updated, so a
    // poisoned guard still wraps coherent state.
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Roster snapshot for read-only surfaces like `/api/online`.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.lock().registry.snapshot_roster()
    }

    /// Handshake succeeded: register the connection, replay history to it
    /// alone, push the grown roster to everyone (the newcomer included).
    pub fn connect(
        &self,
        connection_id: Uuid,
        identity: Identity,
        sender: ConnectionSender,
    ) -> Result<(), DuplicateConnection> {
        let (history, roster, everyone) = {
            let mut shared = self.lock();
            shared.registry.register(connection_id, identity.clone(), sender.clone())?;
            let history = shared.log.recent(shared.log.capacity());
            (history, shared.registry.snapshot_roster(), shared.registry.senders_all())
        };

        push(&sender, &ServerEvent::ChatHistory { messages: history });
        fanout(&everyone, &ServerEvent::Online { users: roster });

        tracing::info!(
            username = %identity.username,
            role = identity.role.as_str(),
            %connection_id,
            "connected"
        );
        Ok(())
    }

    /// Transport gone, for any reason: forget the connection and push the
    /// shrunk roster to whoever remains. A second call for the same id is
    /// a silent no-op.
    pub fn disconnect(&self, connection_id: Uuid) {
        let removed = {
            let mut shared = self.lock();
            match shared.registry.unregister(connection_id) {
                Some(conn) => {
                    Some((conn, shared.registry.snapshot_roster(), shared.registry.senders_all()))
                }
                None => None,
            }
        };

        let Some((conn, roster, remaining)) = removed else {
            return;
        };
        fanout(&remaining, &ServerEvent::Online { users: roster });

        let online_secs = (OffsetDateTime::now_utc() - conn.joined_at).whole_seconds();
        tracing::info!(
            username = %conn.identity.username,
            %connection_id,
            online_secs,
            "disconnected"
        );
    }

    /// One inbound event from a registered connection. Events from ids
    /// the registry no longer knows are dropped.
    pub fn handle(&self, connection_id: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::SendMessage { text } => self.send_message(connection_id, &text),
            ClientEvent::Pm { to, text } => self.send_pm(connection_id, &to, &text),
            ClientEvent::DeleteMessage { id } => self.delete_message(connection_id, id),
            ClientEvent::Typing { active } => self.typing(connection_id, active),
            ClientEvent::Roster => self.roster_request(connection_id),
        }
    }

    fn send_message(&self, connection_id: Uuid, text: &str) {
        let Some(text) = clean_text(text, self.max_text_len) else { return };

        let (message, everyone) = {
            let mut shared = self.lock();
            let Some(author) = shared.registry.identity_of(connection_id).cloned() else {
                return;
            };
            let message = shared.log.append(Message::broadcast(&author, text));
            (message, shared.registry.senders_all())
        };

        tracing::debug!(id = message.id, username = %message.username, "broadcast");
        fanout(&everyone, &ServerEvent::Message(message));
    }

    fn send_pm(&self, connection_id: Uuid, to: &str, text: &str) {
        let Some(text) = clean_text(text, self.max_text_len) else { return };

        let (message, recipients) = {
            let mut shared = self.lock();
            let Some(author) = shared.registry.identity_of(connection_id).cloned() else {
                return;
            };

            let target_conns = shared.registry.connections_for(to);
            if target_conns.is_empty() {
                // offline target: notice to the initiating connection only
                let origin = shared.registry.sender_of(connection_id);
                drop(shared);
                if let Some(origin) = origin {
                    push(&origin, &ServerEvent::System { text: format!("{to} is offline") });
                }
                return;
            }

            let id = shared.log.allocate_id();
            let message = Message::private(id, &author, to.to_owned(), text);

            // target's tabs plus the author's own (echo), deduplicated so
            // a self-PM arrives once per connection
            let mut recipient_ids = target_conns;
            for conn_id in shared.registry.connections_for(&author.username) {
                if !recipient_ids.contains(&conn_id) {
                    recipient_ids.push(conn_id);
                }
            }
            let recipients: Vec<ConnectionSender> = recipient_ids
                .iter()
                .filter_map(|conn_id| shared.registry.sender_of(*conn_id))
                .collect();

            (message, recipients)
        };

        tracing::debug!(id = message.id, from = %message.username, to, "private message");
        fanout(&recipients, &ServerEvent::Message(message));
    }

    fn delete_message(&self, connection_id: Uuid, id: u64) {
        let deleted = {
            let mut shared = self.lock();
            let Some(identity) = shared.registry.identity_of(connection_id).cloned() else {
                return;
            };
            if identity.role != Role::Mod {
                // same silence as a dropped frame; nothing to probe
                return;
            }

            match shared.log.delete(id) {
                Some(_) => Some((identity.username, shared.registry.senders_all())),
                None => {
                    tracing::debug!(id, "delete for unknown message id");
                    None
                }
            }
        };

        let Some((moderator, everyone)) = deleted else { return };
        tracing::info!(id, %moderator, "message deleted");
        fanout(&everyone, &ServerEvent::MessageDeleted { id });
    }

    fn typing(&self, connection_id: Uuid, active: bool) {
        let (username, others) = {
            let shared = self.lock();
            let Some(identity) = shared.registry.identity_of(connection_id) else {
                return;
            };
            let username = identity.username.clone();
            let others = shared.registry.senders_except_user(&username);
            (username, others)
        };

        fanout(&others, &ServerEvent::Typing { username, active });
    }

    fn roster_request(&self, connection_id: Uuid) {
        let snapshot = {
            let shared = self.lock();
            shared
                .registry
                .sender_of(connection_id)
                .map(|origin| (origin, shared.registry.snapshot_roster()))
        };

        if let Some((origin, roster)) = snapshot {
            push(&origin, &ServerEvent::Online { users: roster });
        }
    }
}

/// Serialize once, clone the frame per recipient. A push only fails when
/// that connection's writer task is already gone; its reader tears the
/// connection down on its own, so failures here are ignored.
fn fanout(recipients: &[ConnectionSender], event: &ServerEvent) {
    let Some(frame) = encode(event) else { return };
    for sender in recipients {
        let _ = sender.send(frame.clone());
    }
}

fn push(recipient: &ConnectionSender, event: &ServerEvent) {
    if let Some(frame) = encode(event) {
        let _ = recipient.send(frame);
    }
}

fn encode(event: &ServerEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(text) => Some(WsMessage::Text(text.into())),
        Err(err) => {
            tracing::error!(%err, "failed to encode server event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::log::MessageKind;
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn engine() -> FanoutEngine {
        FanoutEngine::new(200, 2000)
    }

    fn identity(name: &str, role: Role) -> Identity {
        Identity {
            username: name.to_owned(),
            role,
            gender: None,
        }
    }

    fn connect(engine: &FanoutEngine, name: &str, role: Role) -> (Uuid, UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::now_v7();
        engine.connect(connection_id, identity(name, role), tx).unwrap();
        (connection_id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let WsMessage::Text(text) = frame else {
                panic!("expected text frame, got {frame:?}");
            };
            events.push(serde_json::from_str(&text).expect("frame should parse back"));
        }
        events
    }

    fn messages(events: &[ServerEvent]) -> Vec<&Message> {
        events
            .iter()
            .filter_map(|event| match event {
                ServerEvent::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_replays_history_to_newcomer_only() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        engine.handle(alice, ClientEvent::SendMessage { text: "hi".to_owned() });
        drain(&mut alice_rx);

        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        let bob_events = drain(&mut bob_rx);

        let ServerEvent::ChatHistory { messages } = &bob_events[0] else {
            panic!("first event should be the history replay");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hi");

        // alice got the grown roster but no second history
        let alice_events = drain(&mut alice_rx);
        assert!(matches!(alice_events.as_slice(), [ServerEvent::Online { users }] if users.len() == 2));
    }

    #[test]
    fn scenario_connect_send_delete_disconnect() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);

        let events = drain(&mut alice_rx);
        assert!(matches!(&events[0], ServerEvent::ChatHistory { messages } if messages.is_empty()));
        let ServerEvent::Online { users } = &events[1] else { panic!("expected roster") };
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].role, Role::User);

        let (bob, mut bob_rx) = connect(&engine, "bob", Role::Mod);
        let events = drain(&mut alice_rx);
        let ServerEvent::Online { users } = &events[0] else { panic!("expected roster") };
        assert_eq!(
            users.iter().map(|u| (u.username.as_str(), u.role)).collect::<Vec<_>>(),
            [("alice", Role::User), ("bob", Role::Mod)]
        );
        drain(&mut bob_rx);

        engine.handle(alice, ClientEvent::SendMessage { text: "hi".to_owned() });
        let alice_msgs = drain(&mut alice_rx);
        let bob_msgs = drain(&mut bob_rx);
        let sent = messages(&alice_msgs)[0];
        assert_eq!(sent.id, 1);
        assert_eq!(sent.username, "alice");
        assert_eq!(sent.text, "hi");
        assert_eq!(sent.kind, MessageKind::Broadcast);
        assert_eq!(messages(&bob_msgs)[0], sent);

        engine.handle(bob, ClientEvent::DeleteMessage { id: sent.id });
        assert_eq!(drain(&mut alice_rx), [ServerEvent::MessageDeleted { id: 1 }]);
        assert_eq!(drain(&mut bob_rx), [ServerEvent::MessageDeleted { id: 1 }]);

        engine.disconnect(alice);
        let events = drain(&mut bob_rx);
        let ServerEvent::Online { users } = &events[0] else { panic!("expected roster") };
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "bob");
    }

    #[test]
    fn non_mod_delete_is_silent_and_mutates_nothing() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        engine.handle(alice, ClientEvent::SendMessage { text: "keep me".to_owned() });
        drain(&mut alice_rx);

        engine.handle(alice, ClientEvent::DeleteMessage { id: 1 });
        assert!(drain(&mut alice_rx).is_empty());

        // the message is still replayed to the next connection
        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        let events = drain(&mut bob_rx);
        assert!(matches!(&events[0], ServerEvent::ChatHistory { messages } if messages.len() == 1));
    }

    #[test]
    fn mod_delete_of_missing_id_notifies_nobody() {
        let engine = engine();
        let (bob, mut bob_rx) = connect(&engine, "bob", Role::Mod);
        drain(&mut bob_rx);

        engine.handle(bob, ClientEvent::DeleteMessage { id: 42 });
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn private_message_reaches_every_tab_plus_echo() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        let (_bob1, mut bob1_rx) = connect(&engine, "bob", Role::User);
        let (_bob2, mut bob2_rx) = connect(&engine, "bob", Role::User);
        let (_carol, mut carol_rx) = connect(&engine, "carol", Role::User);
        for rx in [&mut alice_rx, &mut bob1_rx, &mut bob2_rx, &mut carol_rx] {
            drain(rx);
        }

        engine.handle(alice, ClientEvent::Pm { to: "bob".to_owned(), text: "psst".to_owned() });

        for rx in [&mut alice_rx, &mut bob1_rx, &mut bob2_rx] {
            let events = drain(rx);
            let received = messages(&events);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].kind, MessageKind::Private);
            assert_eq!(received[0].to.as_deref(), Some("bob"));
            assert_eq!(received[0].text, "psst");
        }
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[test]
    fn private_message_to_offline_user_notices_sender_only() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        engine.handle(alice, ClientEvent::Pm { to: "nobody".to_owned(), text: "hello?".to_owned() });

        let events = drain(&mut alice_rx);
        assert_eq!(events, [ServerEvent::System { text: "nobody is offline".to_owned() }]);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn self_private_message_arrives_once_per_connection() {
        let engine = engine();
        let (alice1, mut rx1) = connect(&engine, "alice", Role::User);
        let (_alice2, mut rx2) = connect(&engine, "alice", Role::User);
        drain(&mut rx1);
        drain(&mut rx2);

        engine.handle(alice1, ClientEvent::Pm { to: "alice".to_owned(), text: "note".to_owned() });

        for rx in [&mut rx1, &mut rx2] {
            let events = drain(rx);
            assert_eq!(messages(&events).len(), 1);
        }
    }

    #[test]
    fn typing_skips_every_tab_of_the_sender() {
        let engine = engine();
        let (alice1, mut rx1) = connect(&engine, "alice", Role::User);
        let (_alice2, mut rx2) = connect(&engine, "alice", Role::User);
        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        for rx in [&mut rx1, &mut rx2, &mut bob_rx] {
            drain(rx);
        }

        engine.handle(alice1, ClientEvent::Typing { active: true });

        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(
            drain(&mut bob_rx),
            [ServerEvent::Typing { username: "alice".to_owned(), active: true }]
        );
    }

    #[test]
    fn roster_request_answers_requester_only() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        engine.handle(alice, ClientEvent::Roster);

        let events = drain(&mut alice_rx);
        assert!(matches!(&events[0], ServerEvent::Online { users } if users.len() == 2));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn invalid_text_is_dropped_without_a_reply() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        drain(&mut alice_rx);

        engine.handle(alice, ClientEvent::SendMessage { text: "   ".to_owned() });
        engine.handle(alice, ClientEvent::SendMessage { text: "x".repeat(2001) });
        engine.handle(alice, ClientEvent::Pm { to: "bob".to_owned(), text: "".to_owned() });

        assert!(drain(&mut alice_rx).is_empty());
    }

    #[test]
    fn second_disconnect_broadcasts_nothing() {
        let engine = engine();
        let (alice, _alice_rx) = connect(&engine, "alice", Role::User);
        let (_bob, mut bob_rx) = connect(&engine, "bob", Role::User);
        drain(&mut bob_rx);

        engine.disconnect(alice);
        assert_eq!(drain(&mut bob_rx).len(), 1);

        engine.disconnect(alice);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn duplicate_connection_id_is_rejected() {
        let engine = engine();
        let (alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        drain(&mut alice_rx);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = engine.connect(alice, identity("mallory", Role::User), tx);
        assert_eq!(err, Err(DuplicateConnection(alice)));

        // the first registration is untouched and still addressed
        assert_eq!(engine.roster().len(), 1);
        assert_eq!(engine.roster()[0].username, "alice");
    }

    #[test]
    fn events_from_unregistered_connections_are_dropped() {
        let engine = engine();
        let (_alice, mut alice_rx) = connect(&engine, "alice", Role::User);
        drain(&mut alice_rx);

        engine.handle(Uuid::now_v7(), ClientEvent::SendMessage { text: "ghost".to_owned() });
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[test]
    fn ids_stay_monotonic_under_concurrent_senders() {
        let engine = engine();
        let conns: Vec<Uuid> = (0..4)
            .map(|i| connect(&engine, &format!("user{i}"), Role::User).0)
            .collect();

        std::thread::scope(|scope| {
            for conn in &conns {
                scope.spawn(|| {
                    for i in 0..25 {
                        engine.handle(*conn, ClientEvent::SendMessage { text: format!("m{i}") });
                    }
                });
            }
        });

        let (_observer, mut rx) = connect(&engine, "observer", Role::User);
        let events = drain(&mut rx);
        let ServerEvent::ChatHistory { messages } = &events[0] else {
            panic!("expected history");
        };
        assert_eq!(messages.len(), 100);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }
}
