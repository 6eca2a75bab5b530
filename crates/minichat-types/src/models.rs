use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authorization role attached to an identity.
///
/// Only `User` is issued today. Stored roles that are blank or unknown
/// resolve to `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
        }
    }

    /// Resolve a stored role column, falling back to the default role.
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(r) if r.eq_ignore_ascii_case("user") || r.eq_ignore_ascii_case("role_user") => {
                Self::User
            }
            _ => Self::default(),
        }
    }
}

/// Public view of a registered user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub members: Vec<String>,
}

impl Group {
    pub fn chat_id(&self) -> String {
        group_chat_id(self.id)
    }
}

/// A persisted chat message. `id` and `timestamp` are always server-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: String,
    pub group_id: Option<i64>,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

const GROUP_CHAT_PREFIX: &str = "group_";
const PRIVATE_CHAT_PREFIX: &str = "private_";

/// Chat id of a group conversation.
pub fn group_chat_id(group_id: i64) -> String {
    format!("{}{}", GROUP_CHAT_PREFIX, group_id)
}

/// Chat id of a two-party conversation. Order of the participants does not
/// matter.
pub fn private_chat_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}_{}", PRIVATE_CHAT_PREFIX, first, second)
}

/// Parse the group id back out of a group chat id.
pub fn group_id_from_chat_id(chat_id: &str) -> Option<i64> {
    chat_id.strip_prefix(GROUP_CHAT_PREFIX)?.parse().ok()
}
