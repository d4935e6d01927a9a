use serde::{Deserialize, Serialize};

/// Role granted at login. `Mod` outranks `User`, so a username whose
/// connections somehow disagree resolves to mod in the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Mod,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Mod => "mod",
        }
    }
}

/// One authenticated participant, resolved at login time. Immutable for
/// the lifetime of a connection; a user with several tabs holds several
/// connections, each carrying its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub role: Role,
    pub gender: Option<String>,
}
