//! Drains the broker session's inbound channel into the chat service.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use courier_chat::ChatService;
use courier_net::Inbound;

/// Spawn the dispatcher.  The task ends when the broker session closes and
/// yields how many messages decoded into events.
pub fn spawn_dispatcher(service: Arc<ChatService>, mut inbound: Inbound) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut handled = 0usize;
        while let Some(message) = inbound.recv().await {
            if service.handle_inbound(&message).is_some() {
                handled += 1;
            } else {
                debug!(topic = %message.topic, "Inbound message ignored");
            }
        }
        info!(handled, "Inbound channel closed");
        handled
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use tokio::sync::mpsc;

    use courier_net::{InboundMessage, MemoryHub};
    use courier_store::Database;

    fn inbound(topic: &str, payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn test_dispatcher_counts_decoded_events() {
        let hub = MemoryHub::new();
        let (session, _session_rx) = hub.connect("backend");
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = Arc::new(ChatService::new(db, Arc::new(session), 200));

        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_dispatcher(service, rx);

        let receipt: &'static [u8] = br#"{"chat_id":"6f1c1f7e-3a8e-4d7c-9a35-2f4cf8f0b1d2","user_id":"2","read_at":"2024-05-01T10:00:00.000000Z","read_all":true}"#;
        tx.send(inbound("chat/direct_1_2/read-receipts", receipt))
            .await
            .unwrap();
        tx.send(inbound("chat/direct_1_2/messages", b"garbage"))
            .await
            .unwrap();
        tx.send(inbound("elsewhere", b"{}")).await.unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
    }
}
