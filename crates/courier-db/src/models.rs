use anyhow::anyhow;
use chrono::{DateTime, NaiveDateTime, Utc};
use courier_types::models::{Message, User};
use tracing::warn;

// Database row types map directly to SQLite rows, distinct from the
// courier-types models to keep the DB layer independent.

#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub user_name: String,
    pub email: String,
    pub hashed_pwd: String,
}

/// A message joined with both participants.
#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub text: String,
    /// JSON array of attachment keys, NULL when none were sent.
    pub links: Option<String>,
    pub created_at: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_id: i64,
    pub receiver_name: String,
    pub receiver_email: String,
}

/// Result of an edit or delete that is only allowed for the message's sender.
#[derive(Debug)]
pub enum OwnedWrite<T> {
    Applied(T),
    NotFound,
    NotOwner,
}

// -- Conversions to domain types --

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            user_name: row.user_name,
            email: row.email,
        }
    }
}

/// Fails on an unreadable `created_at`, since history order depends on it.
/// Corrupt `links` only lose the attachments.
impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> anyhow::Result<Self> {
        let links = match row.links.as_deref() {
            None => Vec::new(),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("Corrupt links '{}' on message {}: {}", raw, row.id, e);
                Vec::new()
            }),
        };

        let created_at = parse_timestamp(&row.created_at).ok_or_else(|| {
            anyhow!("Corrupt created_at '{}' on message {}", row.created_at, row.id)
        })?;

        Ok(Self {
            id: row.id,
            text: row.text,
            links,
            sender: User {
                id: row.sender_id,
                user_name: row.sender_name,
                email: row.sender_email,
            },
            receiver: User {
                id: row.receiver_id,
                user_name: row.receiver_name,
                email: row.receiver_email,
            },
            created_at,
        })
    }
}

/// Accepts the RFC 3339 form written by inserts, and SQLite's bare
/// "YYYY-MM-DD HH:MM:SS" for rows written by hand.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}
