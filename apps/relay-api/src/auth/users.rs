//! Static username/password directory backing the login route.

use std::collections::HashMap;

/// Credentials accepted by `POST /api/v1/auth/login`.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, String>,
}

impl UserDirectory {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    /// Returns true when `username` exists and `password` matches.
    pub fn check(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
