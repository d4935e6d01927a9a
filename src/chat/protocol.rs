//! The wire catalog: JSON text frames, one event per frame, tagged by
//! `type`. Inbound names match what the browser client emits; outbound
//! names match what it listens for.

use serde::{Deserialize, Serialize};

use super::log::Message;
use super::registry::RosterEntry;

/// Everything a client may send over its socket. Frames that don't parse
/// into one of these are dropped before they reach the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage { text: String },
    Pm { to: String, text: String },
    DeleteMessage { id: u64 },
    Typing { active: bool },
    Roster,
}

/// Everything the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connect-time replay, sent to the new connection only.
    ChatHistory { messages: Vec<Message> },
    /// Full roster snapshot; pushed on every roster change.
    Online { users: Vec<RosterEntry> },
    /// A broadcast or private message, tagged by its `kind` field.
    Message(Message),
    MessageDeleted { id: u64 },
    Typing { username: String, active: bool },
    /// Out-of-band notice for the receiving connection only.
    System { text: String },
}

/// Sanitize inbound message text: trim, cap the length, strip control
/// characters (newlines survive), escape HTML. `None` means the event is
/// dropped without a reply.
pub(crate) fn clean_text(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max_len {
        return None;
    }

    let kept: String = trimmed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    if kept.trim().is_empty() {
        return None;
    }

    Some(escape_html(kept.trim()))
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
