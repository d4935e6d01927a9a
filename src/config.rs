use std::str::FromStr;

/// Runtime knobs, read once at startup from the environment (a `.env`
/// file works too). Every value has a default so a bare `cargo run`
/// comes up serving.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Shared secret that grants the mod role at login.
    pub mod_code: String,
    /// Credential for the login-audit page; `None` disables the page.
    pub admin_code: Option<String>,
    /// How many broadcast messages the room remembers.
    pub history_cap: usize,
    pub max_message_len: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: var_or("PORT", 8080),
            mod_code: dotenv::var("MOD_CODE").unwrap_or_else(|_| "12345".to_owned()),
            admin_code: dotenv::var("ADMIN_CODE").ok().filter(|code| !code.is_empty()),
            history_cap: var_or("HISTORY_CAP", 200),
            max_message_len: var_or("MAX_MESSAGE_LEN", 2000),
        }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
