use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered account. The password hash never leaves the db layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub email: String,
}

/// A direct message with both participants resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    /// Object-store keys of attachments, in the order they were sent.
    pub links: Vec<String>,
    pub sender: User,
    pub receiver: User,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Both directions of a conversation share the same unordered pair.
    pub fn is_between(&self, a: i64, b: i64) -> bool {
        (self.sender.id == a && self.receiver.id == b) || (self.sender.id == b && self.receiver.id == a)
    }
}
