use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    /// Insert a user. Returns `false` if the username is already taken.
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            ) {
                Ok(_) => Ok(true),
                Err(e) if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Case-insensitive username prefix search, excluding `exclude_id`.
    pub fn search_users(&self, prefix: &str, exclude_id: &str, limit: u32) -> Result<Vec<UserRow>> {
        let pattern = format!("{}%", escape_like(prefix));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' AND id != ?2
                 ORDER BY username
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![pattern, exclude_id, limit], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message between two existing users.
    ///
    /// Assigns the id and a `created_at` strictly greater than every message
    /// already stored. Returns `None` if either participant does not exist.
    pub fn append_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            for user_id in [sender_id, receiver_id] {
                if query_user(conn, "id", user_id)?.is_none() {
                    return Ok(None);
                }
            }

            let last: i64 = conn.query_row(
                "SELECT COALESCE(MAX(created_at), 0) FROM messages",
                [],
                |row| row.get(0),
            )?;
            let created_at = chrono::Utc::now().timestamp_millis().max(last + 1);
            let id = Uuid::new_v4().to_string();

            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, receiver_id, body, created_at],
            )?;

            Ok(Some(MessageRow {
                id,
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.to_string(),
                body: body.to_string(),
                created_at,
            }))
        })
    }

    /// Messages exchanged between `user_a` and `user_b` in either direction,
    /// oldest first. At most `limit` rows: the most recent ones older than
    /// `before` (Unix ms) when given.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation(conn, user_a, user_b, limit, before))
    }
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], map_user).optional()?;

    Ok(row)
}

fn query_conversation(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<MessageRow>> {
    // Newest `limit` first, then flipped so callers always see ascending order
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, body, created_at
         FROM messages
         WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
           AND (?3 IS NULL OR created_at < ?3)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?4",
    )?;

    let mut rows = stmt
        .query_map(rusqlite::params![user_a, user_b, before, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                body: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.reverse();
    Ok(rows)
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
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
