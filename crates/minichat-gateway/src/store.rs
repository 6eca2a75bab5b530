//! Storage seams used by the gateway, with their SQLite implementations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use minichat_db::Database;
use minichat_db::models::{GroupRow, MessageRow};
use minichat_types::models::{Group, Message};

/// A message accepted by the router, before it has an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub group_id: Option<i64>,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub trait MessageStore: Send + Sync {
    /// Persist as a new record and return it with its assigned id.
    fn append_message(&self, message: &NewMessage) -> Result<Message>;
}

pub trait GroupStore: Send + Sync {
    fn create_group(&self, name: &str, members: &[String]) -> Result<Group>;
    /// Replace name and members. `false` if no such group.
    fn update_group(&self, group: &Group) -> Result<bool>;
    fn find_group(&self, id: i64) -> Result<Option<Group>>;
    fn all_groups(&self) -> Result<Vec<Group>>;
    fn groups_with_member(&self, username: &str) -> Result<Vec<Group>>;
}

pub trait PresenceStore: Send + Sync {
    fn set_online(&self, username: &str, online: bool, now: DateTime<Utc>) -> Result<()>;
}

pub fn message_from_row(row: MessageRow) -> Message {
    let timestamp = minichat_db::parse_timestamp(&row.timestamp).unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}' on message {}: {}", row.timestamp, row.id, e);
        DateTime::default()
    });

    Message {
        id: row.id,
        chat_id: row.chat_id,
        group_id: row.group_id,
        sender: row.sender,
        content: row.content,
        timestamp,
    }
}

pub fn group_from_row(row: GroupRow) -> Group {
    Group {
        id: row.id,
        name: row.name,
        members: row.members,
    }
}

impl MessageStore for Database {
    fn append_message(&self, message: &NewMessage) -> Result<Message> {
        let row = self.insert_message(
            &message.chat_id,
            message.group_id,
            &message.sender,
            &message.content,
            &minichat_db::format_timestamp(message.timestamp),
        )?;
        Ok(message_from_row(row))
    }
}

impl GroupStore for Database {
    fn create_group(&self, name: &str, members: &[String]) -> Result<Group> {
        self.insert_group(name, members).map(group_from_row)
    }

    fn update_group(&self, group: &Group) -> Result<bool> {
        self.replace_group(group.id, &group.name, &group.members)
    }

    fn find_group(&self, id: i64) -> Result<Option<Group>> {
        Ok(self.get_group(id)?.map(group_from_row))
    }

    fn all_groups(&self) -> Result<Vec<Group>> {
        Ok(self.list_groups()?.into_iter().map(group_from_row).collect())
    }

    fn groups_with_member(&self, username: &str) -> Result<Vec<Group>> {
        Ok(self
            .groups_containing(username)?
            .into_iter()
            .map(group_from_row)
            .collect())
    }
}

impl PresenceStore for Database {
    fn set_online(&self, username: &str, online: bool, now: DateTime<Utc>) -> Result<()> {
        Database::set_online(self, username, online, &minichat_db::format_timestamp(now))
    }
}
