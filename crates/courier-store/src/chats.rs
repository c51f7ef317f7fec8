//! CRUD operations for [`Chat`] records and their participants.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::{ChannelId, ChatId, UserId};

use crate::codec::{decode_enum, decode_ts, decode_uuid, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Chat;

const CHAT_COLUMNS: &str = "c.id, c.channel_id, c.kind, c.name, c.created_by, c.last_activity, c.created_at";

/// Per-participant boolean settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantFlag {
    Muted,
    Archived,
}

impl ParticipantFlag {
    fn column(self) -> &'static str {
        match self {
            Self::Muted => "muted",
            Self::Archived => "archived",
        }
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a chat together with its participant rows, atomically.
    ///
    /// A second chat with the same `channel_id` is rejected with
    /// [`StoreError::Duplicate`] and nothing is written.
    pub fn insert_chat(&self, chat: &Chat) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO chats (id, channel_id, kind, name, created_by, last_activity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chat.id.to_string(),
                chat.channel_id.as_str(),
                chat.kind.as_str(),
                chat.name,
                chat.created_by.as_str(),
                encode_ts(&chat.last_activity),
                encode_ts(&chat.created_at),
            ],
        )
        .map_err(StoreError::from_write)?;

        for (position, user_id) in chat.participants.iter().enumerate() {
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, position, muted, archived)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chat.id.to_string(),
                    user_id.as_str(),
                    position as i64,
                    chat.muted_by.contains(user_id),
                    chat.archived_by.contains(user_id),
                ],
            )
            .map_err(StoreError::from_write)?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        let conn = self.conn();
        let mut chat = conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(StoreError::from_lookup)?;
        fill_participants(&conn, &mut chat)?;
        Ok(chat)
    }

    pub fn find_chat_by_channel(&self, channel_id: &ChannelId) -> Result<Option<Chat>> {
        let conn = self.conn();
        let chat = conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.channel_id = ?1"),
                params![channel_id.as_str()],
                row_to_chat,
            )
            .optional()?;

        match chat {
            Some(mut chat) => {
                fill_participants(&conn, &mut chat)?;
                Ok(Some(chat))
            }
            None => Ok(None),
        }
    }

    /// Chats the user participates in, most recent activity first.
    pub fn list_chats_for_user(&self, user_id: &UserId) -> Result<Vec<Chat>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.last_activity DESC, c.created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            let mut chat = row?;
            fill_participants(&conn, &mut chat)?;
            chats.push(chat);
        }
        Ok(chats)
    }

    /// Every channel id known to the store.
    pub fn list_channel_ids(&self) -> Result<Vec<ChannelId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT channel_id FROM chats ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(ChannelId(row?));
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Move a chat's activity forward to `at`.  An older timestamp leaves
    /// it untouched.  Returns the stored activity time.
    pub fn touch_chat_activity(&self, id: ChatId, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        // Timestamps share one fixed-width UTC format, so text order is time order.
        let stored: String = self
            .conn()
            .query_row(
                "UPDATE chats SET last_activity = MAX(last_activity, ?1) WHERE id = ?2
                 RETURNING last_activity",
                params![encode_ts(&at), id.to_string()],
                |row| row.get(0),
            )
            .map_err(StoreError::from_lookup)?;
        Ok(decode_ts(0, &stored)?)
    }

    /// Append a participant at the end of the join order.  Returns `false`
    /// if the user was already a participant.
    pub fn add_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, position)
                 SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1
                 FROM chat_participants WHERE chat_id = ?1",
                params![chat_id.to_string(), user_id.as_str()],
            )
            .map_err(StoreError::from_write)?;
        Ok(affected > 0)
    }

    /// Returns `false` if the user was not a participant.
    pub fn remove_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Set a participant flag.  Returns `false` if the user is not a
    /// participant of the chat.
    pub fn set_participant_flag(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        flag: ParticipantFlag,
        value: bool,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            &format!(
                "UPDATE chat_participants SET {} = ?1 WHERE chat_id = ?2 AND user_id = ?3",
                flag.column()
            ),
            params![value, chat_id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Chat`] without participants.
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id_str: String = row.get(0)?;
    let channel_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let name: Option<String> = row.get(3)?;
    let created_by: String = row.get(4)?;
    let activity_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(Chat {
        id: ChatId(decode_uuid(0, &id_str)?),
        channel_id: ChannelId(channel_id),
        kind: decode_enum(2, &kind_str)?,
        name,
        participants: Vec::new(),
        created_by: UserId(created_by),
        last_activity: decode_ts(5, &activity_str)?,
        created_at: decode_ts(6, &created_str)?,
        muted_by: Vec::new(),
        archived_by: Vec::new(),
    })
}

fn fill_participants(conn: &Connection, chat: &mut Chat) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, muted, archived FROM chat_participants
         WHERE chat_id = ?1 ORDER BY position ASC",
    )?;

    let rows = stmt.query_map(params![chat.id.to_string()], |row| {
        Ok((
            UserId(row.get::<_, String>(0)?),
            row.get::<_, bool>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;

    for row in rows {
        let (user_id, muted, archived) = row?;
        if muted {
            chat.muted_by.push(user_id.clone());
        }
        if archived {
            chat.archived_by.push(user_id.clone());
        }
        chat.participants.push(user_id);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::timestamp_now;
    use crate::users::tests::sample_user;
    use courier_shared::ChatKind;

    pub(crate) fn seeded_db(user_ids: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for id in user_ids {
            db.insert_user(&sample_user(id, &format!("user{id}"))).unwrap();
        }
        db
    }

    pub(crate) fn direct_chat(a: &str, b: &str) -> Chat {
        let (a, b) = (UserId::from(a), UserId::from(b));
        let now = timestamp_now();
        Chat {
            id: ChatId::new(),
            channel_id: ChannelId::direct(&a, &b),
            kind: ChatKind::Direct,
            name: None,
            participants: vec![a.clone(), b],
            created_by: a,
            last_activity: now,
            created_at: now,
            muted_by: Vec::new(),
            archived_by: Vec::new(),
        }
    }

    #[test]
    fn insert_and_lookup() {
        let db = seeded_db(&["1", "2"]);
        let chat = direct_chat("1", "2");
        db.insert_chat(&chat).unwrap();

        assert_eq!(db.get_chat(chat.id).unwrap(), chat);
        let by_channel = db.find_chat_by_channel(&chat.channel_id).unwrap().unwrap();
        assert_eq!(by_channel.id, chat.id);
        assert!(db
            .find_chat_by_channel(&ChannelId("direct_x_y".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_channel_rejected_without_partial_write() {
        let db = seeded_db(&["1", "2"]);
        db.insert_chat(&direct_chat("1", "2")).unwrap();

        let dup = direct_chat("2", "1");
        match db.insert_chat(&dup) {
            Err(StoreError::Duplicate { field }) => assert_eq!(field, "chats.channel_id"),
            other => panic!("expected duplicate channel, got {other:?}"),
        }
        assert!(matches!(db.get_chat(dup.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn list_for_user_orders_by_activity() {
        let db = seeded_db(&["1", "2", "3"]);
        let older = direct_chat("1", "2");
        let newer = direct_chat("1", "3");
        db.insert_chat(&older).unwrap();
        db.insert_chat(&newer).unwrap();

        db.touch_chat_activity(older.id, timestamp_now() + chrono::Duration::seconds(60))
            .unwrap();

        let chats = db.list_chats_for_user(&UserId::from("1")).unwrap();
        let ids: Vec<_> = chats.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);

        assert_eq!(db.list_chats_for_user(&UserId::from("3")).unwrap().len(), 1);
        assert_eq!(db.list_channel_ids().unwrap().len(), 2);
    }

    #[test]
    fn participants_and_flags() {
        let db = seeded_db(&["1", "2", "3"]);
        let chat = direct_chat("1", "2");
        db.insert_chat(&chat).unwrap();

        assert!(db.add_participant(chat.id, &UserId::from("3")).unwrap());
        assert!(!db.add_participant(chat.id, &UserId::from("3")).unwrap());
        let loaded = db.get_chat(chat.id).unwrap();
        assert_eq!(loaded.participants.last(), Some(&UserId::from("3")));

        assert!(db
            .set_participant_flag(chat.id, &UserId::from("2"), ParticipantFlag::Muted, true)
            .unwrap());
        assert!(!db
            .set_participant_flag(chat.id, &UserId::from("9"), ParticipantFlag::Archived, true)
            .unwrap());
        assert_eq!(db.get_chat(chat.id).unwrap().muted_by, vec![UserId::from("2")]);

        assert!(db.remove_participant(chat.id, &UserId::from("3")).unwrap());
        assert!(!db.remove_participant(chat.id, &UserId::from("3")).unwrap());
    }

    #[test]
    fn activity_never_moves_backwards() {
        let db = seeded_db(&["1", "2"]);
        let chat = direct_chat("1", "2");
        db.insert_chat(&chat).unwrap();

        let later = timestamp_now() + chrono::Duration::seconds(60);
        let stored = db.touch_chat_activity(chat.id, later).unwrap();
        assert_eq!(stored, db.get_chat(chat.id).unwrap().last_activity);

        let earlier = later - chrono::Duration::seconds(30);
        assert_eq!(db.touch_chat_activity(chat.id, earlier).unwrap(), stored);
        assert_eq!(db.get_chat(chat.id).unwrap().last_activity, stored);
    }

    #[test]
    fn touch_missing_chat_is_not_found() {
        let db = seeded_db(&[]);
        assert!(matches!(
            db.touch_chat_activity(ChatId::new(), timestamp_now()),
            Err(StoreError::NotFound)
        ));
    }
}
