/// Database row types, mapped directly from SQLite rows.
/// Distinct from minichat-types models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    pub online: bool,
    pub last_seen: String,
}

pub struct GroupRow {
    pub id: i64,
    pub name: String,
    /// Insertion order, no duplicates.
    pub members: Vec<String>,
}

pub struct MessageRow {
    pub id: i64,
    pub chat_id: String,
    pub group_id: Option<i64>,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
}
