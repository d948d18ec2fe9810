use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password::HashedCredential;

/// User record in the database.
#[derive(Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                      // unique user ID
    pub email: String,                 // normalized (trimmed, lower-case)
    pub name: String,                  // display name, not unique
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // Argon2 hash; None for Google-only accounts
    pub profile_pic: String,           // URL or empty
    pub created_at: OffsetDateTime,    // creation timestamp
}

// Hand-written so the password digest never reaches logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field(
                "password_hash",
                &self.password_hash.as_ref().map(|_| "<redacted>"),
            )
            .field("profile_pic", &self.profile_pic)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl User {
    pub fn credential(&self) -> Option<HashedCredential> {
        self.password_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .map(HashedCredential::from_stored)
    }
}

/// Fields supplied by callers when creating a user; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: Option<HashedCredential>,
    pub profile_pic: String,
}

/// Trims and lower-cases an email. Every lookup and insert goes through this,
/// which makes email comparison case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
