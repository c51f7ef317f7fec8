//! CRUD operations for [`Message`] records and their read receipts.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use courier_shared::{ChatId, MessageId, ReadReceipt, UserId};

use crate::codec::{decode_enum, decode_ts, decode_uuid, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

const MESSAGE_COLUMNS: &str =
    "seq, id, chat_id, sender_id, content, message_type, created_at, edited, edited_at";

impl Database {
    /// Append a message.  The returned record carries the assigned `seq`
    /// and an empty receipt list.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<Message> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, message_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.id.to_string(),
                msg.chat_id.to_string(),
                msg.sender_id.as_str(),
                msg.content,
                msg.message_type.as_str(),
                encode_ts(&msg.created_at),
            ],
        )
        .map_err(StoreError::from_write)?;

        Ok(Message {
            id: msg.id,
            chat_id: msg.chat_id,
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            message_type: msg.message_type,
            created_at: msg.created_at,
            seq: conn.last_insert_rowid(),
            read_by: Vec::new(),
            edited: false,
            edited_at: None,
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let conn = self.conn();
        let mut msg = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_lookup)?;
        fill_receipts(&conn, &mut msg)?;
        Ok(msg)
    }

    /// A page of a chat's history in chronological order.  `offset` counts
    /// from the oldest message.
    pub fn list_messages_for_chat(
        &self,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, seq ASC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![chat_id.to_string(), i64::from(limit), i64::from(offset)],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut msg = row?;
            fill_receipts(&conn, &mut msg)?;
            messages.push(msg);
        }
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Read receipts
    // ------------------------------------------------------------------

    /// Record that `user_id` read the message.  Returns `false` when a
    /// receipt for that user already existed; the stored `read_at` is kept.
    pub fn add_read_receipt(
        &self,
        message_id: MessageId,
        user_id: &UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![message_id.to_string(), user_id.as_str(), encode_ts(&at)],
            )
            .map_err(StoreError::from_write)?;
        Ok(affected > 0)
    }

    /// Mark every message in the chat not sent by `user_id` and not yet read
    /// by them, optionally only those created at or before `before`.
    /// Returns the number of receipts written.
    pub fn mark_chat_read(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        before: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at)
             SELECT m.id, ?2, ?3 FROM messages m
             WHERE m.chat_id = ?1
               AND m.sender_id <> ?2
               AND (?4 IS NULL OR m.created_at <= ?4)
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )
             ORDER BY m.created_at ASC, m.seq ASC",
            params![
                chat_id.to_string(),
                user_id.as_str(),
                encode_ts(&at),
                before.as_ref().map(encode_ts),
            ],
        )?;
        Ok(affected)
    }

    /// Messages in the chat the user has not sent and not read.
    pub fn count_unread(&self, chat_id: ChatId, user_id: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.chat_id = ?1
               AND m.sender_id <> ?2
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?2
               )",
            params![chat_id.to_string(), user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let seq: i64 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let chat_str: String = row.get(2)?;
    let sender: String = row.get(3)?;
    let content: String = row.get(4)?;
    let type_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let edited: bool = row.get(7)?;
    let edited_str: Option<String> = row.get(8)?;

    let edited_at = match edited_str {
        Some(raw) => Some(decode_ts(8, &raw)?),
        None => None,
    };

    Ok(Message {
        id: MessageId(decode_uuid(1, &id_str)?),
        chat_id: ChatId(decode_uuid(2, &chat_str)?),
        sender_id: UserId(sender),
        content,
        message_type: decode_enum(5, &type_str)?,
        created_at: decode_ts(6, &created_str)?,
        seq,
        read_by: Vec::new(),
        edited,
        edited_at,
    })
}

fn fill_receipts(conn: &Connection, msg: &mut Message) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, read_at FROM read_receipts
         WHERE message_id = ?1 ORDER BY rowid ASC",
    )?;

    let rows = stmt.query_map(params![msg.id.to_string()], |row| {
        let user_id: String = row.get(0)?;
        let read_at: String = row.get(1)?;
        Ok(ReadReceipt {
            user_id: UserId(user_id),
            read_at: decode_ts(1, &read_at)?,
        })
    })?;

    for row in rows {
        msg.read_by.push(row?);
    }
    Ok(())
}
