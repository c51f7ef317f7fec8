//! v001 -- Initial schema creation.
//!
//! Creates `users`, `chats`, `chat_participants`, `messages` and
//! `read_receipts`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    username   TEXT NOT NULL UNIQUE,
    email      TEXT NOT NULL UNIQUE,
    status     TEXT NOT NULL DEFAULT 'offline',
    last_seen  TEXT NOT NULL,                 -- RFC-3339, microseconds, UTC
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    channel_id    TEXT NOT NULL UNIQUE,       -- direct_{a}_{b} | group_{uuid}
    kind          TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
    name          TEXT,
    created_by    TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    created_at    TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_chats_last_activity ON chats(last_activity DESC);

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id  TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    position INTEGER NOT NULL,                -- join order
    muted    INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1
    archived INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,  -- monotonic insertion order
    id           TEXT NOT NULL UNIQUE,               -- UUID v4
    chat_id      TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    content      TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT 'text',
    created_at   TEXT NOT NULL,
    edited       INTEGER NOT NULL DEFAULT 0,
    edited_at    TEXT,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_created
    ON messages(chat_id, created_at, seq);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);

-- ----------------------------------------------------------------
-- Read receipts (one per message and user, insertion ordered by rowid)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS read_receipts (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    read_at    TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_read_receipts_user ON read_receipts(user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
