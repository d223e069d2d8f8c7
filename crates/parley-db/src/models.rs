//! Database row types. These map directly to SQLite rows and are kept
//! separate from the wire models in parley-types.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_types::models::{Message, User};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password: String,
    pub bio: String,
    pub profile_pic: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub seen: bool,
    pub created_at: String,
}

/// Partial profile update. `None` leaves the stored column as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
}

impl UserRow {
    /// Sanitized view for clients; drops the password hash.
    pub fn into_user(self) -> User {
        User {
            id: parse_id(&self.id, "user"),
            created_at: parse_time(&self.created_at, &self.id),
            updated_at: parse_time(&self.updated_at, &self.id),
            full_name: self.full_name,
            email: self.email,
            bio: self.bio,
            profile_pic: self.profile_pic,
        }
    }
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: parse_id(&self.id, "message"),
            sender_id: parse_id(&self.sender_id, "sender"),
            receiver_id: parse_id(&self.receiver_id, "receiver"),
            created_at: parse_time(&self.created_at, &self.id),
            text: self.text,
            image: self.image,
            seen: self.seen,
        }
    }
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_time(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}' on '{}': {}", raw, owner, e);
        DateTime::default()
    })
}
