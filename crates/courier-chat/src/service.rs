//! Chat Service: the facade callers use.
//!
//! Each mutating call runs Directory -> Ledger -> Relay and returns the
//! persisted value together with the outcome of the broker publish in a
//! [`Relayed`].  A delivery failure never undoes the write; it can be retried
//! with [`ChatService::redeliver_message`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use courier_net::{Broker, InboundMessage};
use courier_shared::constants::DEFAULT_PAGE_SIZE;
use courier_shared::{ChatId, MessageId, MessageType, ReceiptScope, UserId};
use courier_store::{Chat, Database, Message};

use crate::directory::{ChatDirectory, Resolved};
use crate::error::ChatError;
use crate::ledger::{ChatRead, MessageLedger};
use crate::relay::{DeliveryRelay, InboundEvent};
use crate::users::UserRegistry;

/// A persisted value plus the result of relaying it.
#[derive(Debug)]
pub struct Relayed<T> {
    pub value: T,
    pub delivery: Result<(), ChatError>,
}

impl<T> Relayed<T> {
    fn new(value: T, delivery: Result<(), ChatError>) -> Self {
        Self { value, delivery }
    }

    /// Human-readable warning when delivery failed.
    pub fn warning(&self) -> Option<String> {
        self.delivery.as_ref().err().map(|e| e.to_string())
    }

    pub fn delivered(&self) -> bool {
        self.delivery.is_ok()
    }
}

pub struct ChatService {
    users: UserRegistry,
    directory: ChatDirectory,
    ledger: MessageLedger,
    relay: DeliveryRelay,
}

impl ChatService {
    pub fn new(db: Arc<Database>, broker: Arc<dyn Broker>, max_page_size: u32) -> Self {
        let directory = ChatDirectory::new(Arc::clone(&db));
        Self {
            users: UserRegistry::new(Arc::clone(&db)),
            ledger: MessageLedger::new(db, directory.clone()).with_max_page_size(max_page_size),
            directory,
            relay: DeliveryRelay::new(broker),
        }
    }

    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        self.relay.broker()
    }

    /// Subscribe the wildcard patterns, then every stored chat's topics.
    /// Returns the number of channels restored.
    pub async fn bootstrap(&self) -> Result<usize, ChatError> {
        self.relay.bootstrap().await?;
        let channel_ids = self.directory.channel_ids()?;
        Ok(self.relay.restore_subscriptions(&channel_ids).await)
    }

    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    pub async fn open_direct(
        &self,
        user_a: &UserId,
        user_b: &UserId,
    ) -> Result<Relayed<Resolved>, ChatError> {
        let resolved = self.directory.resolve_or_create_direct(user_a, user_b)?;
        let delivery = self.relay.on_chat_created(&resolved.chat).await;
        Ok(Relayed::new(resolved, delivery))
    }

    pub async fn create_group(
        &self,
        creator_id: &UserId,
        participant_ids: &[UserId],
        name: &str,
    ) -> Result<Relayed<Chat>, ChatError> {
        let chat = self.directory.create_group(creator_id, participant_ids, name)?;
        let delivery = self.relay.on_chat_created(&chat).await;
        Ok(Relayed::new(chat, delivery))
    }

    pub fn chats_for_user(&self, user_id: &UserId) -> Result<Vec<Chat>, ChatError> {
        self.directory.get_for_user(user_id)
    }

    pub fn get_chat(&self, chat_id: ChatId) -> Result<Chat, ChatError> {
        self.directory.get_by_id(chat_id)
    }

    pub fn add_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<Chat, ChatError> {
        self.directory.add_participant(chat_id, user_id)
    }

    pub fn remove_participant(&self, chat_id: ChatId, user_id: &UserId) -> Result<Chat, ChatError> {
        self.directory.remove_participant(chat_id, user_id)
    }

    pub fn set_muted(&self, chat_id: ChatId, user_id: &UserId, muted: bool) -> Result<Chat, ChatError> {
        self.directory.set_muted(chat_id, user_id, muted)
    }

    pub fn set_archived(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        archived: bool,
    ) -> Result<Chat, ChatError> {
        self.directory.set_archived(chat_id, user_id, archived)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: &UserId,
        content: &str,
        message_type: MessageType,
    ) -> Result<Relayed<Message>, ChatError> {
        let appended = self.ledger.append(chat_id, sender_id, content, message_type)?;
        let sender = self.users.display_name(sender_id);
        let delivery = self
            .relay
            .on_message_appended(&appended.message, &appended.chat, sender)
            .await;
        Ok(Relayed::new(appended.message, delivery))
    }

    /// History page; `limit` defaults to the standard page size.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.ledger
            .list(chat_id, limit.unwrap_or(DEFAULT_PAGE_SIZE), offset)
    }

    pub fn get_message(&self, message_id: MessageId) -> Result<Message, ChatError> {
        self.ledger.get(message_id)
    }

    /// Mark one message read and publish the receipt, carrying the stored
    /// `read_at` so repeated calls announce the same instant.
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: &UserId,
    ) -> Result<Relayed<Message>, ChatError> {
        let message = self.ledger.mark_read(message_id, user_id)?;
        let chat = self.directory.get_by_id(message.chat_id)?;
        let read_at = message
            .receipt_for(user_id)
            .map(|r| r.read_at)
            .ok_or(ChatError::NotFound("Read receipt"))?;

        let delivery = self
            .relay
            .on_read_receipt(&chat, ReceiptScope::Message { message_id }, user_id, read_at, false)
            .await;
        Ok(Relayed::new(message, delivery))
    }

    /// Mark a chat read.  A receipt is published only when something changed.
    pub async fn mark_chat_read(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Relayed<ChatRead>, ChatError> {
        let outcome = self.ledger.mark_chat_read(chat_id, user_id, before)?;
        let delivery = if outcome.count > 0 {
            self.relay
                .on_read_receipt(
                    &outcome.chat,
                    ReceiptScope::Chat { chat_id },
                    user_id,
                    outcome.read_at,
                    true,
                )
                .await
        } else {
            Ok(())
        };
        Ok(Relayed::new(outcome, delivery))
    }

    pub fn unread_count(&self, chat_id: ChatId, user_id: &UserId) -> Result<u64, ChatError> {
        self.ledger.unread_count(chat_id, user_id)
    }

    /// Publish a stored message again.  Fails with
    /// [`ChatError::DeliveryFailed`] if the broker still refuses it.
    pub async fn redeliver_message(&self, message_id: MessageId) -> Result<Message, ChatError> {
        let message = self.ledger.get(message_id)?;
        let chat = self.directory.get_by_id(message.chat_id)?;
        let sender = self.users.display_name(&message.sender_id);

        self.relay
            .on_message_appended(&message, &chat, sender)
            .await?;
        info!(message_id = %message_id, "Message redelivered");
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decode and log a broker message.  Malformed input yields `None`.
    pub fn handle_inbound(&self, inbound: &InboundMessage) -> Option<InboundEvent> {
        let event = self.relay.handle_inbound(&inbound.topic, &inbound.payload)?;
        match &event {
            InboundEvent::Message { channel_id, envelope } => info!(
                channel = %channel_id,
                message_id = %envelope.id,
                sender_id = %envelope.sender_id,
                "Inbound message"
            ),
            InboundEvent::ReadReceipt { channel_id, envelope } => info!(
                channel = %channel_id,
                user_id = %envelope.user_id,
                read_all = envelope.read_all,
                "Inbound read receipt"
            ),
        }
        Some(event)
    }
}

/// Log a delivery failure attached to an otherwise successful operation.
pub fn log_delivery<T>(operation: &str, relayed: &Relayed<T>) {
    if let Err(e) = &relayed.delivery {
        warn!(operation, error = %e, "Persisted but not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_net::{MemoryHub, MemorySession};
    use courier_shared::constants::MAX_PAGE_SIZE;
    use courier_shared::MessageEnvelope;
    use tokio::sync::mpsc;

    struct Harness {
        service: Arc<ChatService>,
        hub: MemoryHub,
        _observer: MemorySession,
        observer_rx: mpsc::Receiver<InboundMessage>,
        alice: UserId,
        bob: UserId,
    }

    async fn harness() -> Harness {
        let hub = MemoryHub::new();
        let (session, _rx) = hub.connect("backend");
        let (observer, observer_rx) = hub.connect("observer");
        observer.subscribe("chat/#").await.unwrap();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = ChatService::new(db, Arc::new(session), MAX_PAGE_SIZE);
        service.bootstrap().await.unwrap();

        let alice = service.users().create("alice", "alice@example.com").unwrap().id;
        let bob = service.users().create("bob", "bob@example.com").unwrap().id;

        Harness {
            service: Arc::new(service),
            hub,
            _observer: observer,
            observer_rx,
            alice,
            bob,
        }
    }

    #[tokio::test]
    async fn test_send_publishes_envelope() {
        let mut h = harness().await;
        let chat = h.service.open_direct(&h.alice, &h.bob).await.unwrap();
        assert!(chat.delivered());
        let chat = chat.value.chat;

        let sent = h
            .service
            .send_message(chat.id, &h.alice, "hello", MessageType::Text)
            .await
            .unwrap();
        assert!(sent.delivered());
        assert_eq!(sent.warning(), None);

        let inbound = h.observer_rx.recv().await.unwrap();
        assert_eq!(inbound.topic, chat.channel_id.messages_topic());
        let envelope = MessageEnvelope::from_json(&inbound.payload).unwrap();
        assert_eq!(envelope.id, sent.value.id);
        assert_eq!(envelope.sender.as_deref(), Some("alice"));
        assert!(h.service.handle_inbound(&inbound).is_some());
    }

    #[tokio::test]
    async fn test_receipts_follow_reads() {
        let mut h = harness().await;
        let chat = h.service.open_direct(&h.alice, &h.bob).await.unwrap().value.chat;
        let m1 = h
            .service
            .send_message(chat.id, &h.bob, "one", MessageType::Text)
            .await
            .unwrap()
            .value;
        h.service
            .send_message(chat.id, &h.bob, "two", MessageType::Text)
            .await
            .unwrap();
        while h.observer_rx.try_recv().is_ok() {}

        let first = h.service.mark_read(m1.id, &h.alice).await.unwrap();
        let again = h.service.mark_read(m1.id, &h.alice).await.unwrap();
        assert_eq!(first.value.read_by, again.value.read_by);

        let r1 = h.observer_rx.recv().await.unwrap();
        let r2 = h.observer_rx.recv().await.unwrap();
        assert_eq!(r1.topic, chat.channel_id.receipts_topic());
        assert_eq!(r1.payload, r2.payload);

        let read = h.service.mark_chat_read(chat.id, &h.alice, None).await.unwrap();
        assert_eq!(read.value.count, 1);
        match h.service.handle_inbound(&h.observer_rx.recv().await.unwrap()) {
            Some(InboundEvent::ReadReceipt { envelope, .. }) => {
                assert!(envelope.read_all);
                assert_eq!(envelope.scope, ReceiptScope::Chat { chat_id: chat.id });
            }
            other => panic!("unexpected {other:?}"),
        }

        let nothing = h.service.mark_chat_read(chat.id, &h.alice, None).await.unwrap();
        assert_eq!(nothing.value.count, 0);
        assert!(h.observer_rx.try_recv().is_err());
        assert_eq!(h.service.unread_count(chat.id, &h.alice).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broker_outage_keeps_message_and_redelivers() {
        let mut h = harness().await;
        let chat = h.service.open_direct(&h.alice, &h.bob).await.unwrap().value.chat;

        h.hub.set_available(false);
        let sent = h
            .service
            .send_message(chat.id, &h.alice, "are you there?", MessageType::Text)
            .await
            .unwrap();
        assert!(matches!(sent.delivery, Err(ChatError::DeliveryFailed(_))));
        assert!(sent.warning().is_some());
        assert_eq!(h.service.get_message(sent.value.id).unwrap(), sent.value);
        assert_eq!(h.service.list_messages(chat.id, None, 0).unwrap().len(), 1);

        assert!(h.service.redeliver_message(sent.value.id).await.unwrap_err().is_delivery());

        h.hub.set_available(true);
        h.service.redeliver_message(sent.value.id).await.unwrap();
        let inbound = h.observer_rx.recv().await.unwrap();
        assert_eq!(MessageEnvelope::from_json(&inbound.payload).unwrap().id, sent.value.id);
    }

    #[tokio::test]
    async fn test_group_chats_are_distinct_and_subscribed() {
        let h = harness().await;
        let carol = h.service.users().create("carol", "carol@example.com").unwrap().id;
        let members = [h.bob.clone(), carol];

        let a = h.service.create_group(&h.alice, &members, "team").await.unwrap();
        let b = h.service.create_group(&h.alice, &members, "team").await.unwrap();
        assert_ne!(a.value.id, b.value.id);
        assert!(a.delivered() && b.delivered());

        let chats = h.service.chats_for_user(&h.bob).unwrap();
        assert_eq!(chats.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_direct_yields_one_chat() {
        let h = harness().await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = Arc::clone(&h.service);
                let (a, b) = if i % 2 == 0 {
                    (h.alice.clone(), h.bob.clone())
                } else {
                    (h.bob.clone(), h.alice.clone())
                };
                tokio::spawn(async move { service.open_direct(&a, &b).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().value.chat.id);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(h.service.chats_for_user(&h.alice).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_restores_channel_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let hub = MemoryHub::new();

        let db = Arc::new(Database::open_at(&path).unwrap());
        let (first_session, _rx) = hub.connect("first");
        let first = ChatService::new(db, Arc::new(first_session), MAX_PAGE_SIZE);
        let alice = first.users().create("alice", "alice@example.com").unwrap().id;
        let bob = first.users().create("bob", "bob@example.com").unwrap().id;
        first.open_direct(&alice, &bob).await.unwrap();
        first.create_group(&alice, &[bob], "team").await.unwrap();
        drop(first);

        let db = Arc::new(Database::open_at(&path).unwrap());
        let (second_session, _rx) = hub.connect("second");
        let second = ChatService::new(db, Arc::new(second_session), MAX_PAGE_SIZE);
        assert_eq!(second.bootstrap().await.unwrap(), 2);
    }
}
