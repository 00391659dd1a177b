pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenKeys;
use auth::users::UserDirectory;
use config::Config;
use gateway::identity::JwtVerifier;
use gateway::Gateway;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenKeys,
    pub users: Arc<UserDirectory>,
    pub gateway: Gateway,
}

impl AppState {
    /// Wire up token keys, the user directory, and the gateway core.
    pub fn new(config: Config) -> Self {
        let tokens = TokenKeys::from_secret(&config.jwt_secret, config.token_ttl_secs);
        let gateway = Gateway::new(
            Arc::new(JwtVerifier::new(tokens.clone())),
            config.duplicate_login,
            config.notify_undelivered,
        );
        let users = Arc::new(UserDirectory::new(config.users.clone()));

        Self {
            config: Arc::new(config),
            tokens,
            users,
            gateway,
        }
    }
}
