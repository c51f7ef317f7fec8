//! Domain model structs persisted in the database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_shared::{
    ChannelId, ChatId, ChatKind, MessageEnvelope, MessageId, MessageType, ReadReceipt, UserId,
    UserStatus,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-party or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    /// Shared addressing key between storage and the broker.
    pub channel_id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    /// Present iff `kind` is `Group`.
    pub name: Option<String>,
    /// Participants in join order; the creator comes first.
    pub participants: Vec<UserId>,
    pub created_by: UserId,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub muted_by: Vec<UserId>,
    pub archived_by: Vec<UserId>,
}

impl Chat {
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Fields supplied by the caller when appending a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    /// Insertion sequence; breaks ties between equal `created_at` values.
    pub seq: i64,
    /// Receipts in the order they were recorded, at most one per user.
    pub read_by: Vec<ReadReceipt>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_by.iter().any(|r| &r.user_id == user_id)
    }

    pub fn receipt_for(&self, user_id: &UserId) -> Option<&ReadReceipt> {
        self.read_by.iter().find(|r| &r.user_id == user_id)
    }

    /// Build the broker envelope for this message.
    pub fn to_envelope(&self, sender: Option<String>) -> MessageEnvelope {
        MessageEnvelope {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id.clone(),
            sender,
            content: self.content.clone(),
            message_type: self.message_type,
            created_at: self.created_at,
            read_by: self.read_by.clone(),
        }
    }
}
