use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use renteasy_types::models::{Conversation, Message, MessageKind};

use crate::{Database, Result, StoreError};

/// Conversation and message persistence used by the chat gateway and the
/// REST handlers. Calls block; async callers go through `spawn_blocking`.
pub trait ChatStore: Send + Sync {
    /// Returns the conversation between the unordered pair `{party_a, party_b}`
    /// scoped to `property_id`, creating it with `party_a` as initiator if absent.
    fn find_or_create_conversation(
        &self,
        property_id: Option<i64>,
        party_a: i64,
        party_b: i64,
    ) -> Result<Conversation>;

    fn get_conversation(&self, conversation_id: i64) -> Result<Option<Conversation>>;

    /// Inserts a message with a server-assigned timestamp and bumps the
    /// conversation's `last_message_at` in the same transaction.
    fn append_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        kind: MessageKind,
        content: &str,
    ) -> Result<Message>;

    /// Oldest first.
    fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>>;

    /// Conversations where `user_id` is either party, most recently active first.
    fn list_conversations_for_user(&self, user_id: i64) -> Result<Vec<Conversation>>;
}

const CONVERSATION_COLUMNS: &str =
    "id, property_id, initiator_id, recipient_id, created_at, last_message_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, kind, content, attachment_url, created_at, read_at";

impl ChatStore for Database {
    fn find_or_create_conversation(
        &self,
        property_id: Option<i64>,
        party_a: i64,
        party_b: i64,
    ) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            // IMMEDIATE takes the write lock up front so lookup and insert are
            // one unit even if another process shares the file.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations
                         WHERE property_id IS ?1
                           AND ((initiator_id = ?2 AND recipient_id = ?3)
                             OR (initiator_id = ?3 AND recipient_id = ?2))
                         ORDER BY id LIMIT 1"
                    ),
                    rusqlite::params![property_id, party_a, party_b],
                    conversation_from_row,
                )
                .optional()?;

            if let Some(conversation) = existing {
                return Ok(conversation);
            }

            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO conversations (property_id, initiator_id, recipient_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![property_id, party_a, party_b, created_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            debug!(
                "Created conversation {} ({} -> {}, property {:?})",
                id, party_a, party_b, property_id
            );

            Ok(Conversation {
                id,
                property_id,
                initiator_id: party_a,
                recipient_id: party_b,
                created_at,
                last_message_at: None,
            })
        })
    }

    fn get_conversation(&self, conversation_id: i64) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                    [conversation_id],
                    conversation_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    fn append_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        kind: MessageKind,
        content: &str,
    ) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = Utc::now();

            let updated = tx.execute(
                "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
                rusqlite::params![created_at, conversation_id],
            )?;
            if updated == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, kind, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![conversation_id, sender_id, kind.as_str(), content, created_at],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            Ok(Message {
                id,
                conversation_id,
                sender_id,
                kind,
                content: content.to_string(),
                attachment_url: None,
                created_at,
                read_at: None,
            })
        })
    }

    fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;

            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    fn list_conversations_for_user(&self, user_id: i64) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE initiator_id = ?1 OR recipient_id = ?1
                 ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC"
            ))?;

            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

impl Database {
    pub fn last_message(&self, conversation_id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT 1"
                    ),
                    [conversation_id],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Messages in the conversation sent by someone other than `user_id` and
    /// not yet marked read.
    pub fn unread_count(&self, conversation_id: i64, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND read_at IS NULL",
                [conversation_id, user_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        property_id: row.get(1)?,
        initiator_id: row.get(2)?,
        recipient_id: row.get(3)?,
        created_at: row.get(4)?,
        last_message_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: String = row.get(3)?;
    let kind = kind
        .parse::<MessageKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind,
        content: row.get(4)?,
        attachment_url: row.get(5)?,
        created_at: row.get(6)?,
        read_at: row.get(7)?,
    })
}
