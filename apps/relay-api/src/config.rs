use std::collections::HashMap;
use std::str::FromStr;

use crate::auth::tokens::DEFAULT_TOKEN_TTL_SECS;

/// What happens when an identity that is already online connects again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateLoginPolicy {
    /// The new connection supersedes the old one, which is closed.
    #[default]
    Evict,
    /// The new connection is refused; the old one stays.
    Reject,
}

impl FromStr for DuplicateLoginPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict" => Ok(Self::Evict),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate login policy: {other}")),
        }
    }
}

/// Relay API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HS256 secret used to sign and verify bearer tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Lifetime of issued tokens, in seconds.
    pub token_ttl_secs: u64,
    /// Username → password table accepted by the login route.
    pub users: HashMap<String, String>,
    /// Allowed browser origin. `None` allows any origin.
    pub cors_origin: Option<String>,
    pub duplicate_login: DuplicateLoginPolicy,
    /// Send `private_message_undelivered` back to the sender when the
    /// recipient is offline.
    pub notify_undelivered: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing
    /// or a set variable cannot be parsed.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: required_var("JWT_SECRET"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            token_ttl_secs: std::env::var("TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            users: std::env::var("CHAT_USERS")
                .map(|v| parse_users(&v))
                .unwrap_or_default(),
            cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            duplicate_login: std::env::var("DUPLICATE_LOGIN_POLICY")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|v| v.parse().unwrap_or_else(|e| panic!("DUPLICATE_LOGIN_POLICY: {e}")))
                .unwrap_or_default(),
            notify_undelivered: std::env::var("NOTIFY_UNDELIVERED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}

/// Parse `alice:1234,bob:abcd` into a user table. Malformed pairs are skipped.
pub fn parse_users(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, password) = pair.trim().split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), password.to_string()))
        })
        .collect()
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
