use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::identity::{Identity, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Broadcast,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl Message {
    /// A room-wide message; the log assigns its id on append.
    pub fn broadcast(author: &Identity, text: String) -> Self {
        Self {
            id: 0,
            username: author.username.clone(),
            role: author.role,
            text,
            ts: OffsetDateTime::now_utc(),
            kind: MessageKind::Broadcast,
            to: None,
        }
    }

    /// An ephemeral direct message. Never enters the log; the caller
    /// allocates its id.
    pub fn private(id: u64, author: &Identity, to: String, text: String) -> Self {
        Self {
            id,
            username: author.username.clone(),
            role: author.role,
            text,
            ts: OffsetDateTime::now_utc(),
            kind: MessageKind::Private,
            to: Some(to),
        }
    }
}

/// Append-only, size-bounded record of broadcast messages. Oldest entries
/// fall off silently once the cap is exceeded; only moderator deletion is
/// announced, and that is the engine's job.
pub struct MessageLog {
    entries: VecDeque<Message>,
    cap: usize,
    next_id: u64,
}

impl MessageLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap),
            cap,
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Next value of the process-lifetime id sequence. Private messages
    /// draw from the same sequence without being appended.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Assigns the next id, appends, evicts the oldest entry past
    /// capacity. Returns the stored message, id filled in.
    pub fn append(&mut self, mut message: Message) -> Message {
        message.id = self.allocate_id();
        self.entries.push_back(message.clone());
        if self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        message
    }

    /// Up to the last `n` messages, newest-last.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Removes a message so the caller can build a deletion notice.
    /// `None` when the id was already evicted or deleted — callers log it
    /// and move on, the room never hears about it.
    pub fn delete(&mut self, id: u64) -> Option<Message> {
        let idx = self.entries.iter().position(|message| message.id == id)?;
        self.entries.remove(idx)
    }
}
