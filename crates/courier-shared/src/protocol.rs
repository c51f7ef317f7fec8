use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, MessageType, UserId};

/// A (user, timestamp) record attesting observation of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Payload published on `chat/{channel_id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    /// Display name of the sender, if known when publishing.
    #[serde(default)]
    pub sender: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
}

/// What a receipt envelope acknowledges: one message, or a whole chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ReceiptScope {
    Message { message_id: MessageId },
    Chat { chat_id: ChatId },
}

/// Payload published on `chat/{channel_id}/read-receipts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptEnvelope {
    #[serde(flatten)]
    pub scope: ReceiptScope,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_all: bool,
}

impl MessageEnvelope {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

impl ReceiptEnvelope {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_envelope_field_names() {
        let envelope = MessageEnvelope {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::from("1"),
            sender: Some("alice".into()),
            content: "hello".into(),
            message_type: MessageType::Emoji,
            created_at: Utc::now(),
            read_by: vec![],
        };

        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        for key in [
            "id",
            "chat_id",
            "sender_id",
            "sender",
            "content",
            "message_type",
            "created_at",
            "read_by",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["message_type"], "emoji");
        assert_eq!(value["sender_id"], "1");
    }

    #[test]
    fn test_chat_receipt_carries_read_all() {
        let chat_id = ChatId::new();
        let envelope = ReceiptEnvelope {
            scope: ReceiptScope::Chat { chat_id },
            user_id: UserId::from("2"),
            read_at: Utc::now(),
            read_all: true,
        };

        let bytes = envelope.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["chat_id"], chat_id.to_string());
        assert_eq!(value["read_all"], true);
        assert!(value.get("message_id").is_none());

        let restored = ReceiptEnvelope::from_json(&bytes).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_message_receipt_omits_read_all() {
        let message_id = MessageId::new();
        let raw = format!(
            r#"{{"message_id":"{message_id}","user_id":"7","read_at":"2024-05-01T10:00:00Z"}}"#
        );

        let envelope = ReceiptEnvelope::from_json(raw.as_bytes()).unwrap();
        assert_eq!(envelope.scope, ReceiptScope::Message { message_id });
        assert!(!envelope.read_all);

        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert!(value.get("read_all").is_none());
    }

    #[test]
    fn test_malformed_envelope_rejected() {
        assert!(MessageEnvelope::from_json(b"{not json").is_err());
        assert!(ReceiptEnvelope::from_json(br#"{"user_id":"1"}"#).is_err());
    }
}
