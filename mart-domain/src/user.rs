//! Registered users.

use serde::{Deserialize, Serialize};

/// A registered user.
///
/// The numeric id is the identity the rest of the system threads through
/// handlers and ledgers; login is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier
    pub id: i64,
    /// Unique login
    pub login: String,
    /// Argon2 password hash
    pub password_hash: String,
}
