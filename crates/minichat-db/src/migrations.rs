use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT,
            online      INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS groups (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            username    TEXT NOT NULL,
            position    INTEGER NOT NULL,
            PRIMARY KEY (group_id, username)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_username
            ON group_members(username);

        -- group_id deliberately has no foreign key: a message addressed to a
        -- missing group is still stored.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL,
            group_id    INTEGER,
            sender      TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, timestamp);

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_id, timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
