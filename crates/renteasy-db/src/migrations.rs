use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                name            TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user',
                created_at      TEXT NOT NULL
            );

            CREATE TABLE properties (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id    INTEGER NOT NULL,
                title       TEXT NOT NULL,
                price       REAL NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_properties_owner ON properties(owner_id);

            CREATE TABLE conversations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                property_id     INTEGER,
                initiator_id    INTEGER NOT NULL,
                recipient_id    INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                last_message_at TEXT
            );

            CREATE INDEX idx_conversations_pair
                ON conversations(property_id, initiator_id, recipient_id);
            CREATE INDEX idx_conversations_recipient ON conversations(recipient_id);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                sender_id       INTEGER NOT NULL,
                kind            TEXT NOT NULL DEFAULT 'text',
                content         TEXT NOT NULL,
                attachment_url  TEXT,
                created_at      TEXT NOT NULL,
                read_at         TEXT
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (user phone)");
        conn.execute_batch(
            "
            ALTER TABLE users ADD COLUMN phone TEXT;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    Ok(())
}
