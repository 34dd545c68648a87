use courier_db::Database;
use courier_types::models::{Message, User};

use crate::error::ApiResult;

/// Users who have sent a message to, or received one from, `user`.
/// No ordering is promised.
pub fn list_conversation_partners(db: &Database, user: &User) -> ApiResult<Vec<User>> {
    let rows = db.conversation_partners(user.id)?;
    Ok(rows.into_iter().map(User::from).collect())
}

/// The full history between `a` and `b`, oldest first. Argument order does
/// not matter.
pub fn list_messages(db: &Database, a: &User, b: &User) -> ApiResult<Vec<Message>> {
    let rows = db.messages_between(a.id, b.id)?;
    let messages = rows
        .into_iter()
        .map(Message::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(messages)
}

/// History with a user named by the client. An unknown name is simply an
/// empty conversation.
pub fn list_messages_with(db: &Database, user: &User, other_name: &str) -> ApiResult<Vec<Message>> {
    match db.get_user_by_username(other_name)? {
        Some(other) => list_messages(db, user, &User::from(other)),
        None => Ok(Vec::new()),
    }
}

pub fn search_users(db: &Database, fragment: &str) -> ApiResult<Vec<User>> {
    let rows = db.search_users(fragment)?;
    Ok(rows.into_iter().map(User::from).collect())
}
