use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            display_name    TEXT,
            email           TEXT,
            created_at      TEXT NOT NULL
        );

        -- One row per unordered pair, stored as (min, max)
        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_low        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            user_high       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            CHECK (user_low < user_high),
            UNIQUE (user_low, user_high)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_high
            ON conversations(user_high);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            text            TEXT NOT NULL CHECK (length(trim(text)) > 0),
            created_at      TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at, id);

        CREATE TABLE IF NOT EXISTS notifications (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            message             TEXT NOT NULL,
            notification_type   TEXT NOT NULL DEFAULT 'info',
            is_read             INTEGER NOT NULL DEFAULT 0,
            link                TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
