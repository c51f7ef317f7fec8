//! Delivery Relay: mirrors ledger and directory mutations onto broker topics.
//!
//! Every chat owns `chat/{channel_id}/messages` and
//! `chat/{channel_id}/read-receipts`.  The relay subscribes both before the
//! first publish on a channel and remembers which channels it holds, so a
//! failed subscription is retried on the next publish.  Publish failures are
//! returned to the caller and never touch what the store already holds.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use courier_net::Broker;
use courier_shared::topics::{self, TopicKind, ALL_MESSAGES, ALL_RECEIPTS};
use courier_shared::{ChannelId, MessageEnvelope, ReceiptEnvelope, ReceiptScope, UserId};
use courier_store::{Chat, Message};

use crate::error::ChatError;

/// A decoded broker message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message {
        channel_id: ChannelId,
        envelope: MessageEnvelope,
    },
    ReadReceipt {
        channel_id: ChannelId,
        envelope: ReceiptEnvelope,
    },
}

pub struct DeliveryRelay {
    broker: Arc<dyn Broker>,
    subscribed: Mutex<HashSet<ChannelId>>,
}

impl DeliveryRelay {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Subscribe the process-wide wildcard patterns.
    pub async fn bootstrap(&self) -> Result<(), ChatError> {
        for pattern in [ALL_MESSAGES, ALL_RECEIPTS] {
            self.broker.subscribe(pattern).await?;
        }
        info!(client_id = %self.broker.client_id(), "Bootstrap subscriptions active");
        Ok(())
    }

    /// Subscribe the concrete topics of every known channel.  Returns how
    /// many channels are now held; failures are logged and retried later.
    pub async fn restore_subscriptions(&self, channel_ids: &[ChannelId]) -> usize {
        let mut restored = 0;
        for channel_id in channel_ids {
            match self.subscribe_channel(channel_id).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(channel = %channel_id, error = %e, "Could not restore subscription"),
            }
        }
        info!(restored, total = channel_ids.len(), "Channel subscriptions restored");
        restored
    }

    pub async fn on_chat_created(&self, chat: &Chat) -> Result<(), ChatError> {
        self.subscribe_channel(&chat.channel_id).await
    }

    /// Publish a stored message on its chat's message topic.  Resolves once
    /// the broker has accepted it.  Nothing is published while the chat's
    /// topics cannot be subscribed.
    pub async fn on_message_appended(
        &self,
        message: &Message,
        chat: &Chat,
        sender_display: Option<String>,
    ) -> Result<(), ChatError> {
        self.subscribe_channel(&chat.channel_id).await.map_err(|e| {
            warn!(channel = %chat.channel_id, error = %e, "Subscription retry failed before publish");
            e
        })?;

        let payload = message.to_envelope(sender_display).to_json()?;
        let topic = chat.channel_id.messages_topic();
        self.publish(&topic, payload).await?;

        debug!(message_id = %message.id, topic = %topic, "Message relayed");
        Ok(())
    }

    pub async fn on_read_receipt(
        &self,
        chat: &Chat,
        scope: ReceiptScope,
        user_id: &UserId,
        read_at: DateTime<Utc>,
        read_all: bool,
    ) -> Result<(), ChatError> {
        let envelope = ReceiptEnvelope {
            scope,
            user_id: user_id.clone(),
            read_at,
            read_all,
        };
        let topic = chat.channel_id.receipts_topic();
        self.publish(&topic, envelope.to_json()?).await?;

        debug!(user_id = %user_id, topic = %topic, read_all, "Read receipt relayed");
        Ok(())
    }

    /// Decode a message received from the broker.  Anything that does not
    /// parse is logged and dropped.
    pub fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Option<InboundEvent> {
        let Some((channel_id, kind)) = topics::parse_topic(topic) else {
            warn!(topic, "Dropping message on unrecognised topic");
            return None;
        };

        let event = match kind {
            TopicKind::Messages => MessageEnvelope::from_json(payload)
                .map(|envelope| InboundEvent::Message {
                    channel_id,
                    envelope,
                }),
            TopicKind::ReadReceipts => ReceiptEnvelope::from_json(payload)
                .map(|envelope| InboundEvent::ReadReceipt {
                    channel_id,
                    envelope,
                }),
        };

        match event {
            Ok(event) => {
                debug!(topic, "Inbound event decoded");
                Some(event)
            }
            Err(e) => {
                warn!(topic, error = %e, len = payload.len(), "Dropping malformed payload");
                None
            }
        }
    }

    pub fn is_subscribed(&self, channel_id: &ChannelId) -> bool {
        self.subscribed.lock().contains(channel_id)
    }

    async fn subscribe_channel(&self, channel_id: &ChannelId) -> Result<(), ChatError> {
        if self.is_subscribed(channel_id) {
            return Ok(());
        }

        self.broker.subscribe(&channel_id.messages_topic()).await?;
        self.broker.subscribe(&channel_id.receipts_topic()).await?;

        self.subscribed.lock().insert(channel_id.clone());
        debug!(channel = %channel_id, "Channel topics subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ChatError> {
        self.broker
            .publish(topic, Bytes::from(payload))
            .await
            .map_err(|e| {
                warn!(topic, error = %e, "Publish failed");
                ChatError::from(e)
            })
    }
}
