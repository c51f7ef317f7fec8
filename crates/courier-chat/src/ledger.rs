//! Message Ledger: ordered message history, read receipts and unread counts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use courier_shared::constants::{MAX_CONTENT_CHARS, MAX_PAGE_SIZE, MIN_CONTENT_CHARS};
use courier_shared::{ChatId, MessageId, MessageType, UserId};
use courier_store::{timestamp_now, Chat, Database, Message, NewMessage};

use crate::directory::ChatDirectory;
use crate::error::ChatError;

/// A freshly stored message together with its (activity-bumped) chat.
#[derive(Debug, Clone)]
pub struct Appended {
    pub message: Message,
    pub chat: Chat,
}

/// Outcome of marking a whole chat read.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRead {
    #[serde(skip)]
    pub chat: Chat,
    pub count: usize,
    pub read_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MessageLedger {
    db: Arc<Database>,
    directory: ChatDirectory,
    max_page_size: u32,
}

impl MessageLedger {
    pub fn new(db: Arc<Database>, directory: ChatDirectory) -> Self {
        Self {
            db,
            directory,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    /// Upper bound applied to page sizes passed to [`MessageLedger::list`].
    pub fn with_max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Store a message sent by a participant and bump the chat's activity.
    pub fn append(
        &self,
        chat_id: ChatId,
        sender_id: &UserId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Appended, ChatError> {
        let mut chat = self.directory.get_by_id(chat_id)?;
        if !chat.is_participant(sender_id) {
            return Err(ChatError::PermissionDenied(format!(
                "user {sender_id} is not a participant of chat {chat_id}"
            )));
        }

        let len = content.chars().count();
        if !(MIN_CONTENT_CHARS..=MAX_CONTENT_CHARS).contains(&len) {
            return Err(ChatError::InvalidArgument(format!(
                "content must be {MIN_CONTENT_CHARS} to {MAX_CONTENT_CHARS} characters"
            )));
        }

        let message = self.db.insert_message(&NewMessage {
            id: MessageId::new(),
            chat_id,
            sender_id: sender_id.clone(),
            content: content.to_string(),
            message_type,
            created_at: timestamp_now(),
        })?;
        chat.last_activity = self.directory.bump_activity(chat_id)?;

        info!(
            message_id = %message.id,
            chat_id = %chat_id,
            sender_id = %sender_id,
            seq = message.seq,
            "Message appended"
        );
        Ok(Appended { message, chat })
    }

    /// A page of history in chronological order.  `offset` counts from the
    /// oldest message; `limit` is clamped to `1..=max_page_size`.
    pub fn list(&self, chat_id: ChatId, limit: u32, offset: u32) -> Result<Vec<Message>, ChatError> {
        self.directory.get_by_id(chat_id)?;
        let limit = limit.clamp(1, self.max_page_size);
        Ok(self.db.list_messages_for_chat(chat_id, limit, offset)?)
    }

    pub fn get(&self, message_id: MessageId) -> Result<Message, ChatError> {
        self.db
            .get_message(message_id)
            .map_err(ChatError::lookup("Message"))
    }

    /// Record that `user_id` read the message.  Marking twice keeps the first
    /// receipt.
    pub fn mark_read(&self, message_id: MessageId, user_id: &UserId) -> Result<Message, ChatError> {
        require_user_id(user_id)?;
        self.get(message_id)?;

        if self.db.add_read_receipt(message_id, user_id, timestamp_now())? {
            debug!(message_id = %message_id, user_id = %user_id, "Read receipt recorded");
        }
        self.get(message_id)
    }

    /// Mark every unread message from other senders as read, optionally only
    /// those created at or before `before`.
    pub fn mark_chat_read(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        before: Option<DateTime<Utc>>,
    ) -> Result<ChatRead, ChatError> {
        require_user_id(user_id)?;
        let chat = self.directory.get_by_id(chat_id)?;

        let read_at = timestamp_now();
        let count = self.db.mark_chat_read(chat_id, user_id, before, read_at)?;

        debug!(chat_id = %chat_id, user_id = %user_id, count, "Chat marked read");
        Ok(ChatRead {
            chat,
            count,
            read_at,
        })
    }

    pub fn unread_count(&self, chat_id: ChatId, user_id: &UserId) -> Result<u64, ChatError> {
        self.directory.get_by_id(chat_id)?;
        Ok(self.db.count_unread(chat_id, user_id)?)
    }
}

fn require_user_id(user_id: &UserId) -> Result<(), ChatError> {
    if user_id.as_str().trim().is_empty() {
        return Err(ChatError::InvalidArgument("user id is required".into()));
    }
    Ok(())
}
