//! Database row types — these map directly to SQLite rows.
//! Distinct from parley-types API models to keep the DB layer independent.

use anyhow::{Result, anyhow};
use chrono::DateTime;
use parley_types::api::UserSummary;
use parley_types::models::Message;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn to_summary(&self) -> Result<UserSummary> {
        Ok(UserSummary {
            id: self.id.parse()?,
            username: self.username.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id.parse()?,
            sender_id: row.sender_id.parse()?,
            receiver_id: row.receiver_id.parse()?,
            created_at: DateTime::from_timestamp_millis(row.created_at)
                .ok_or_else(|| anyhow!("created_at out of range on message {}", row.id))?,
            body: row.body,
        })
    }
}
