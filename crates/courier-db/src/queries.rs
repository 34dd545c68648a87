use crate::Database;
use crate::models::{MessageRow, OwnedWrite, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, user_name, email, hashed_pwd";

// JOIN both participants so a message row is self-contained (no N+1).
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.text, m.links, m.created_at,
           s.id, s.user_name, s.email,
           r.id, r.user_name, r.email
    FROM messages m
    JOIN users s ON s.id = m.sender_id
    JOIN users r ON r.id = m.receiver_id";

impl Database {
    // -- Users --

    /// Insert a user. Returns `None` when the username or email is taken.
    pub fn create_user(
        &self,
        user_name: &str,
        email: &str,
        hashed_pwd: &str,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (user_name, email, hashed_pwd) VALUES (?1, ?2, ?3)",
                (user_name, email, hashed_pwd),
            );

            match inserted {
                Ok(_) => Ok(Some(UserRow {
                    id: conn.last_insert_rowid(),
                    user_name: user_name.to_string(),
                    email: email.to_string(),
                    hashed_pwd: hashed_pwd.to_string(),
                })),
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, user_name: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, user_name))
    }

    /// Case-insensitive substring search over usernames. Matching happens in
    /// Rust so non-ASCII names fold the same way as ASCII ones.
    pub fn search_users(&self, fragment: &str) -> Result<Vec<UserRow>> {
        let needle = fragment.to_lowercase();
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;

            let mut matches = Vec::new();
            for row in stmt.query_map([], user_from_row)? {
                let user = row?;
                if user.user_name.to_lowercase().contains(&needle) {
                    matches.push(user);
                }
            }
            Ok(matches)
        })
    }

    /// Delete a user; their sent and received messages go with them.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// Every user that has exchanged at least one message with `user_id`.
    pub fn conversation_partners(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id IN (
                     SELECT receiver_id FROM messages WHERE sender_id = ?1
                     UNION
                     SELECT sender_id FROM messages WHERE receiver_id = ?1
                 )"
            ))?;

            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message addressed by the receiver's username. The lookup and
    /// the insert share one transaction. Returns `None` if no such receiver.
    pub fn insert_message(
        &self,
        sender_id: i64,
        receiver_name: &str,
        text: &str,
        links: &[String],
    ) -> Result<Option<MessageRow>> {
        let links_json = if links.is_empty() {
            None
        } else {
            Some(serde_json::to_string(links)?)
        };

        self.with_tx(|tx| {
            let Some(receiver) = query_user_by_username(tx, receiver_name)? else {
                return Ok(None);
            };

            // Never hand out a timestamp older than the newest stored one, so
            // insertion order and created_at order agree even if the clock steps back.
            tx.execute(
                "INSERT INTO messages (text, links, created_at, sender_id, receiver_id)
                 VALUES (?1, ?2,
                         MAX(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                             COALESCE((SELECT MAX(created_at) FROM messages), '')),
                         ?3, ?4)",
                rusqlite::params![text, links_json, sender_id, receiver.id],
            )?;

            let id = tx.last_insert_rowid();
            let row = query_message(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished after insert", id))?;
            Ok(Some(row))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// All messages between two users in either direction, oldest first.
    /// Rows sharing a timestamp keep insertion order.
    pub fn messages_between(&self, a: i64, b: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at ASC, m.id ASC"
            ))?;

            let rows = stmt
                .query_map([a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Replace a message's text if `requester_id` sent it.
    pub fn update_message_text(
        &self,
        requester_id: i64,
        id: i64,
        text: &str,
    ) -> Result<OwnedWrite<MessageRow>> {
        self.with_tx(|tx| {
            match message_sender(tx, id)? {
                None => return Ok(OwnedWrite::NotFound),
                Some(sender) if sender != requester_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {}
            }

            tx.execute(
                "UPDATE messages SET text = ?1 WHERE id = ?2",
                rusqlite::params![text, id],
            )?;

            let row = query_message(tx, id)?
                .ok_or_else(|| anyhow::anyhow!("Message {} vanished during update", id))?;
            Ok(OwnedWrite::Applied(row))
        })
    }

    /// Permanently remove a message if `requester_id` sent it.
    pub fn delete_message(&self, requester_id: i64, id: i64) -> Result<OwnedWrite<()>> {
        self.with_tx(|tx| {
            match message_sender(tx, id)? {
                None => return Ok(OwnedWrite::NotFound),
                Some(sender) if sender != requester_id => return Ok(OwnedWrite::NotOwner),
                Some(_) => {}
            }

            tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(OwnedWrite::Applied(()))
        })
    }
}

fn query_user_by_username(conn: &Connection, user_name: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE user_name = ?1"),
        [user_name],
        user_from_row,
    )
    .optional()
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    conn.query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"), [id], message_from_row)
        .optional()
}

fn message_sender(conn: &Connection, id: i64) -> Result<Option<i64>> {
    conn.query_row("SELECT sender_id FROM messages WHERE id = ?1", [id], |row| row.get(0))
        .optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        hashed_pwd: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        text: row.get(1)?,
        links: row.get(2)?,
        created_at: row.get(3)?,
        sender_id: row.get(4)?,
        sender_name: row.get(5)?,
        sender_email: row.get(6)?,
        receiver_id: row.get(7)?,
        receiver_name: row.get(8)?,
        receiver_email: row.get(9)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "a@x.com", "h1").unwrap().unwrap().id;
        let bob = db.create_user("bob", "b@x.com", "h2").unwrap().unwrap().id;
        let carol = db.create_user("carol", "c@x.com", "h3").unwrap().unwrap().id;
        (db, alice, bob, carol)
    }

    #[test]
    fn duplicate_username_or_email_is_rejected() {
        let (db, alice, _, _) = db_with_users();

        assert!(db.create_user("alice", "other@x.com", "h").unwrap().is_none());
        assert!(db.create_user("alice2", "a@x.com", "h").unwrap().is_none());

        let stored = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(stored.id, alice);
        assert_eq!(stored.email, "a@x.com");
        assert_eq!(stored.hashed_pwd, "h1");
    }

    #[test]
    fn username_lookup_is_case_sensitive() {
        let (db, _, _, _) = db_with_users();
        assert!(db.get_user_by_username("Alice").unwrap().is_none());
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let (db, _, _, _) = db_with_users();
        db.create_user("Malia", "m@x.com", "h").unwrap().unwrap();

        let names: Vec<String> = db
            .search_users("ALI")
            .unwrap()
            .into_iter()
            .map(|u| u.user_name)
            .collect();
        assert_eq!(names, vec!["alice", "Malia"]);

        assert!(db.search_users("zzz").unwrap().is_empty());
        assert!(db.search_users("%").unwrap().is_empty());
    }

    #[test]
    fn insert_to_unknown_receiver_returns_none() {
        let (db, alice, _, _) = db_with_users();
        assert!(db.insert_message(alice, "nobody", "hi", &[]).unwrap().is_none());
        assert!(db.conversation_partners(alice).unwrap().is_empty());
    }

    #[test]
    fn links_round_trip_in_order() {
        let (db, alice, _, _) = db_with_users();
        let links = vec!["k2.b.png".to_string(), "k1.a.txt".to_string()];
        let row = db.insert_message(alice, "bob", "files", &links).unwrap().unwrap();
        let stored: Vec<String> = serde_json::from_str(row.links.as_deref().unwrap()).unwrap();
        assert_eq!(stored, links);

        let bare = db.insert_message(alice, "bob", "plain", &[]).unwrap().unwrap();
        assert!(bare.links.is_none());
    }

    #[test]
    fn messages_between_is_symmetric_and_ascending() {
        let (db, alice, bob, carol) = db_with_users();
        db.insert_message(alice, "bob", "one", &[]).unwrap();
        db.insert_message(bob, "alice", "two", &[]).unwrap();
        db.insert_message(alice, "carol", "elsewhere", &[]).unwrap();
        db.insert_message(alice, "bob", "three", &[]).unwrap();

        let ab: Vec<(i64, String)> = db
            .messages_between(alice, bob)
            .unwrap()
            .into_iter()
            .map(|m| (m.id, m.text))
            .collect();
        let ba: Vec<(i64, String)> = db
            .messages_between(bob, alice)
            .unwrap()
            .into_iter()
            .map(|m| (m.id, m.text))
            .collect();

        assert_eq!(ab, ba);
        let texts: Vec<&str> = ab.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        let stamps: Vec<String> = db
            .messages_between(alice, bob)
            .unwrap()
            .into_iter()
            .map(|m| m.created_at)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(db.messages_between(bob, carol).unwrap().len(), 0);
    }

    #[test]
    fn conversation_partners_are_deduplicated() {
        let (db, alice, bob, carol) = db_with_users();
        db.insert_message(alice, "bob", "1", &[]).unwrap();
        db.insert_message(bob, "alice", "2", &[]).unwrap();
        db.insert_message(carol, "alice", "3", &[]).unwrap();

        let mut ids: Vec<i64> = db
            .conversation_partners(alice)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![bob, carol]);

        let bobs: Vec<i64> = db.conversation_partners(bob).unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(bobs, vec![alice]);
    }

    #[test]
    fn only_sender_can_update_or_delete() {
        let (db, alice, bob, _) = db_with_users();
        let msg = db.insert_message(alice, "bob", "hi", &[]).unwrap().unwrap();

        assert!(matches!(
            db.update_message_text(bob, msg.id, "hacked").unwrap(),
            OwnedWrite::NotOwner
        ));
        assert!(matches!(db.delete_message(bob, msg.id).unwrap(), OwnedWrite::NotOwner));
        assert_eq!(db.get_message(msg.id).unwrap().unwrap().text, "hi");

        let edited = match db.update_message_text(alice, msg.id, "hello").unwrap() {
            OwnedWrite::Applied(row) => row,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(edited.text, "hello");
        assert_eq!(edited.created_at, msg.created_at);
        assert_eq!(edited.receiver_id, bob);

        assert!(matches!(db.delete_message(alice, msg.id).unwrap(), OwnedWrite::Applied(())));
        assert!(db.get_message(msg.id).unwrap().is_none());
        assert!(matches!(db.delete_message(alice, msg.id).unwrap(), OwnedWrite::NotFound));
        assert!(matches!(
            db.update_message_text(alice, msg.id, "x").unwrap(),
            OwnedWrite::NotFound
        ));
    }

    #[test]
    fn deleting_a_user_cascades_to_exactly_their_messages() {
        let (db, alice, bob, carol) = db_with_users();
        db.insert_message(alice, "bob", "a->b", &[]).unwrap();
        db.insert_message(carol, "alice", "c->a", &[]).unwrap();
        let kept = db.insert_message(bob, "carol", "b->c", &[]).unwrap().unwrap();

        assert!(db.delete_user(alice).unwrap());
        assert!(!db.delete_user(alice).unwrap());

        assert!(db.messages_between(alice, bob).unwrap().is_empty());
        assert!(db.messages_between(carol, alice).unwrap().is_empty());
        let remaining = db.messages_between(bob, carol).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);
    }
}
