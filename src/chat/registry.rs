use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::identity::{Identity, Role};
use super::ConnectionSender;

/// One live duplex transport session belonging to exactly one identity.
#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: Identity,
    pub joined_at: OffsetDateTime,
    pub sender: ConnectionSender,
}

/// `register` was called with a connection id that is already present.
/// A programming invariant violation, not a user error: the caller closes
/// that transport and the registry stays as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateConnection(pub Uuid);

impl std::fmt::Display for DuplicateConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection {} is already registered", self.0)
    }
}

impl std::error::Error for DuplicateConnection {}

/// Deduplicated view of who is online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

/// The authoritative map of live connections to identities. Mutated only
/// by the engine, under its lock; never observed mid-mutation.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, Connection>,
}

impl ConnectionRegistry {
    pub fn register(
        &mut self,
        connection_id: Uuid,
        identity: Identity,
        sender: ConnectionSender,
    ) -> Result<(), DuplicateConnection> {
        match self.connections.entry(connection_id) {
            Entry::Occupied(_) => Err(DuplicateConnection(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(Connection {
                    identity,
                    joined_at: OffsetDateTime::now_utc(),
                    sender,
                });
                Ok(())
            }
        }
    }

    /// Idempotent: a second call for the same id returns `None`.
    pub fn unregister(&mut self, connection_id: Uuid) -> Option<Connection> {
        self.connections.remove(&connection_id)
    }

    pub fn identity_of(&self, connection_id: Uuid) -> Option<&Identity> {
        self.connections.get(&connection_id).map(|conn| &conn.identity)
    }

    pub fn sender_of(&self, connection_id: Uuid) -> Option<ConnectionSender> {
        self.connections.get(&connection_id).map(|conn| conn.sender.clone())
    }

    /// Every live connection id held by `username`; empty means offline.
    pub fn connections_for(&self, username: &str) -> Vec<Uuid> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.identity.username == username)
            .map(|(id, _)| *id)
            .collect()
    }

    /// One entry per unique username with at least one live connection,
    /// mod winning on role conflict, sorted case-insensitively ascending.
    pub fn snapshot_roster(&self) -> Vec<RosterEntry> {
        let mut seen: HashMap<&str, RosterEntry> = HashMap::new();
        for conn in self.connections.values() {
            let identity = &conn.identity;
            seen.entry(identity.username.as_str())
                .and_modify(|entry| {
                    if identity.role > entry.role {
                        entry.role = identity.role;
                    }
                })
                .or_insert_with(|| RosterEntry {
                    username: identity.username.clone(),
                    role: identity.role,
                    gender: identity.gender.clone(),
                });
        }

        let mut roster: Vec<RosterEntry> = seen.into_values().collect();
        roster.sort_by_key(|entry| entry.username.to_lowercase());
        roster
    }

    /// Outbound handles for every live connection.
    pub fn senders_all(&self) -> Vec<ConnectionSender> {
        self.connections.values().map(|conn| conn.sender.clone()).collect()
    }

    /// Outbound handles for every connection not held by `username`.
    pub fn senders_except_user(&self, username: &str) -> Vec<ConnectionSender> {
        self.connections
            .values()
            .filter(|conn| conn.identity.username != username)
            .map(|conn| conn.sender.clone())
            .collect()
    }
}
