use crate::Database;
use crate::models::{GroupRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, password, role, online, last_seen";
const MESSAGE_COLUMNS: &str = "id, chat_id, group_id, sender, content, timestamp";

impl Database {
    // -- Users --

    /// Fails with a constraint violation if the username or email is taken
    /// (see [`crate::is_unique_violation`]).
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        role: &str,
        last_seen: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, role, online, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![id, username, email, password_hash, role, last_seen],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
            conn.query_row(&sql, [username], user_from_row).optional()
        })
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| exists(conn, "SELECT 1 FROM users WHERE username = ?1", username))
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| exists(conn, "SELECT 1 FROM users WHERE email = ?1", email))
    }

    /// Going offline also stamps `last_seen`. Unknown usernames are ignored.
    pub fn set_online(&self, username: &str, online: bool, now: &str) -> Result<()> {
        self.with_conn(|conn| {
            if online {
                conn.execute(
                    "UPDATE users SET online = 1 WHERE username = ?1",
                    [username],
                )?;
            } else {
                conn.execute(
                    "UPDATE users SET online = 0, last_seen = ?2 WHERE username = ?1",
                    [username, now],
                )?;
            }
            Ok(())
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY username", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring match on username.
    pub fn search_users(&self, query: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE instr(LOWER(username), LOWER(?1)) > 0 ORDER BY username",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([query], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Groups --

    /// Insert a group and its members in one transaction. Duplicate member
    /// names collapse to one entry.
    pub fn insert_group(&self, name: &str, members: &[String]) -> Result<GroupRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("INSERT INTO groups (name) VALUES (?1)", [name])?;
            let id = tx.last_insert_rowid();
            let members = write_members(&tx, id, members)?;
            tx.commit()?;

            Ok(GroupRow {
                id,
                name: name.to_string(),
                members,
            })
        })
    }

    /// Replace a group's name and whole member list. Returns `false` if the
    /// group does not exist.
    pub fn replace_group(&self, id: i64, name: &str, members: &[String]) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE groups SET name = ?2 WHERE id = ?1",
                rusqlite::params![id, name],
            )?;
            if updated == 0 {
                return Ok(false);
            }
            tx.execute("DELETE FROM group_members WHERE group_id = ?1", [id])?;
            write_members(&tx, id, members)?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_group(&self, id: i64) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let name: Option<String> = conn
                .query_row("SELECT name FROM groups WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;

            match name {
                Some(name) => Ok(Some(GroupRow {
                    id,
                    name,
                    members: query_members(conn, id)?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn list_groups(&self) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM groups ORDER BY id")?;
            let heads = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(i64, String)>, _>>()?;
            attach_members(conn, heads)
        })
    }

    pub fn groups_containing(&self, username: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name
                 FROM groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.username = ?1
                 ORDER BY g.id",
            )?;
            let heads = stmt
                .query_map([username], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(i64, String)>, _>>()?;
            attach_members(conn, heads)
        })
    }

    // -- Messages --

    /// Always inserts a new row; the id is assigned by SQLite.
    pub fn insert_message(
        &self,
        chat_id: &str,
        group_id: Option<i64>,
        sender: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (chat_id, group_id, sender, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![chat_id, group_id, sender, content, timestamp],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                chat_id: chat_id.to_string(),
                group_id,
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp: timestamp.to_string(),
            })
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Oldest first.
    pub fn messages_for_chat(&self, chat_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC, id ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message_for_chat(&self, chat_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [chat_id], message_from_row).optional()
        })
    }

    pub fn last_message_for_group(&self, group_id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE group_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                MESSAGE_COLUMNS
            );
            conn.query_row(&sql, [group_id], message_from_row).optional()
        })
    }

    /// Distinct chat ids whose text contains `username`.
    pub fn chat_ids_for_user(&self, username: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT chat_id FROM messages WHERE instr(chat_id, ?1) > 0 ORDER BY chat_id",
            )?;
            let rows = stmt
                .query_map([username], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        online: row.get::<_, i64>(5)? != 0,
        last_seen: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        group_id: row.get(2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn exists(conn: &Connection, sql: &str, value: &str) -> Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [value], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}

fn write_members(conn: &Connection, group_id: i64, members: &[String]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO group_members (group_id, username, position) VALUES (?1, ?2, ?3)",
    )?;
    let mut written = Vec::with_capacity(members.len());
    for member in members {
        let inserted = stmt.execute(rusqlite::params![group_id, member, written.len() as i64])?;
        if inserted > 0 {
            written.push(member.clone());
        }
    }
    Ok(written)
}

fn query_members(conn: &Connection, group_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT username FROM group_members WHERE group_id = ?1 ORDER BY position",
    )?;
    let members = stmt
        .query_map([group_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(members)
}

/// Batch-fetch members for a set of groups (one query instead of N).
fn attach_members(conn: &Connection, heads: Vec<(i64, String)>) -> Result<Vec<GroupRow>> {
    if heads.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=heads.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT group_id, username FROM group_members WHERE group_id IN ({}) ORDER BY group_id, position",
        placeholders.join(", ")
    );
    let ids: Vec<i64> = heads.iter().map(|(id, _)| *id).collect();
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<(i64, String)>, _>>()?;

    let groups = heads
        .into_iter()
        .map(|(id, name)| GroupRow {
            id,
            name,
            members: pairs
                .iter()
                .filter(|(gid, _)| *gid == id)
                .map(|(_, username)| username.clone())
                .collect(),
        })
        .collect();

    Ok(groups)
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
    use crate::is_unique_violation;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str) {
        db.create_user(
            &format!("id-{}", username),
            username,
            &format!("{}@example.com", username),
            "hash",
            "user",
            "2024-01-01T00:00:00.000000Z",
        )
        .unwrap();
    }

    #[test]
    fn duplicate_username_is_a_unique_violation() {
        let db = db();
        add_user(&db, "x");
        let err = db
            .create_user("id-2", "x", "other@example.com", "hash", "user", "2024-01-01T00:00:00.000000Z")
            .unwrap_err();
        assert!(is_unique_violation(&err));
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn online_flag_and_last_seen() {
        let db = db();
        add_user(&db, "alice");

        db.set_online("alice", true, "ignored").unwrap();
        assert!(db.get_user_by_username("alice").unwrap().unwrap().online);

        db.set_online("alice", false, "2025-02-02T00:00:00.000000Z").unwrap();
        let row = db.get_user_by_username("alice").unwrap().unwrap();
        assert!(!row.online);
        assert_eq!(row.last_seen, "2025-02-02T00:00:00.000000Z");
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let db = db();
        add_user(&db, "Alice");
        add_user(&db, "malice");
        add_user(&db, "bob");

        let found: Vec<String> = db
            .search_users("ALI")
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(found, vec!["Alice".to_string(), "malice".to_string()]);
    }

    #[test]
    fn group_members_dedupe_and_keep_order() {
        let db = db();
        let members = vec!["b".to_string(), "c".to_string(), "b".to_string(), "a".to_string()];
        let group = db.insert_group("team", &members).unwrap();
        assert_eq!(group.members, vec!["b", "c", "a"]);

        let loaded = db.get_group(group.id).unwrap().unwrap();
        assert_eq!(loaded.members, vec!["b", "c", "a"]);
        assert!(db.get_group(group.id + 100).unwrap().is_none());
    }

    #[test]
    fn replace_group_swaps_membership() {
        let db = db();
        let group = db.insert_group("team", &["a".to_string(), "b".to_string()]).unwrap();

        assert!(db.replace_group(group.id, "team2", &["c".to_string()]).unwrap());
        let loaded = db.get_group(group.id).unwrap().unwrap();
        assert_eq!(loaded.name, "team2");
        assert_eq!(loaded.members, vec!["c"]);

        assert!(!db.replace_group(999, "nope", &[]).unwrap());
    }

    #[test]
    fn groups_containing_lists_full_membership() {
        let db = db();
        db.insert_group("one", &["a".to_string(), "b".to_string()]).unwrap();
        db.insert_group("two", &["b".to_string(), "c".to_string()]).unwrap();
        db.insert_group("three", &["c".to_string()]).unwrap();

        let groups = db.groups_containing("b").unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(groups[1].members, vec!["b", "c"]);
        assert_eq!(db.list_groups().unwrap().len(), 3);
    }

    #[test]
    fn messages_order_and_latest() {
        let db = db();
        let first = db
            .insert_message("alice_bob", None, "alice", "one", "2024-01-01T00:00:01.000000Z")
            .unwrap();
        db.insert_message("alice_bob", None, "bob", "two", "2024-01-01T00:00:02.000000Z")
            .unwrap();
        db.insert_message("group_1", Some(1), "carol", "g", "2024-01-01T00:00:03.000000Z")
            .unwrap();

        let history = db.messages_for_chat("alice_bob").unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert_eq!(history[0].id, first.id);

        assert_eq!(db.last_message_for_chat("alice_bob").unwrap().unwrap().content, "two");
        assert_eq!(db.last_message_for_group(1).unwrap().unwrap().content, "g");
        assert!(db.last_message_for_group(2).unwrap().is_none());
        assert!(db.last_message_for_chat("nobody").unwrap().is_none());
    }

    #[test]
    fn message_ids_are_fresh() {
        let db = db();
        let a = db.insert_message("c", None, "s", "x", "2024-01-01T00:00:00.000000Z").unwrap();
        let b = db.insert_message("c", None, "s", "x", "2024-01-01T00:00:00.000000Z").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(db.get_message(b.id).unwrap().unwrap().content, "x");
    }

    #[test]
    fn chat_ids_for_user_matches_substring() {
        let db = db();
        let ts = "2024-01-01T00:00:00.000000Z";
        db.insert_message("private_alice_bob", None, "alice", "x", ts).unwrap();
        db.insert_message("private_alice_bob", None, "bob", "y", ts).unwrap();
        db.insert_message("private_bob_carol", None, "bob", "z", ts).unwrap();

        assert_eq!(db.chat_ids_for_user("alice").unwrap(), vec!["private_alice_bob"]);
        assert_eq!(db.chat_ids_for_user("bob").unwrap().len(), 2);
    }
}
