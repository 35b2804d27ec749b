use alumnet_models::gateway::{EVENT_MESSAGES_READ_UPDATE, EVENT_MESSAGE_STATUS_UPDATE};
use alumnet_models::message::{
    MarkMessagesRead, MessageDelivered, MessageStatusUpdate, MessagesReadUpdate, STATUS_DELIVERED,
};

use crate::directory::MessageStore;
use crate::events::EventBus;

/// Store read receipts for `reader` and notify the other participants of
/// the conversation.
pub async fn mark_messages_read(
    messages: &dyn MessageStore,
    bus: &EventBus,
    reader: &str,
    request: MarkMessagesRead,
) {
    if let Some(claimed) = request.user_id.as_deref() {
        if claimed != reader {
            tracing::warn!(
                user_id = %reader,
                claimed,
                "read receipt named another user, recording it for the connection owner"
            );
        }
    }
    if request.message_ids.is_empty() {
        return;
    }

    if let Err(e) = messages
        .mark_read(&request.message_ids, &request.chat_id, reader)
        .await
    {
        tracing::warn!(user_id = %reader, chat_id = %request.chat_id, "failed to store read receipts: {e}");
        return;
    }

    let participants = match messages.participants(&request.chat_id).await {
        Ok(participants) => participants,
        Err(e) => {
            tracing::warn!(chat_id = %request.chat_id, "conversation lookup failed: {e}");
            return;
        }
    };

    let update = MessagesReadUpdate {
        chat_id: request.chat_id,
        message_ids: request.message_ids,
        reader_id: reader.to_string(),
    };
    for participant in participants.iter().filter(|p| p.as_str() != reader) {
        bus.emit_to_identity(participant, EVENT_MESSAGES_READ_UPDATE, &update);
    }
}

/// Advance a message to delivered and tell its sender.
pub async fn message_delivered(
    messages: &dyn MessageStore,
    bus: &EventBus,
    recipient: &str,
    request: MessageDelivered,
) {
    let delivered = match messages.mark_delivered(&request.message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            tracing::debug!(message_id = %request.message_id, "delivery ack for unknown message");
            return;
        }
        Err(e) => {
            tracing::warn!(user_id = %recipient, message_id = %request.message_id, "failed to mark delivered: {e}");
            return;
        }
    };

    if delivered.sender_id == recipient {
        return;
    }
    bus.emit_to_identity(
        &delivered.sender_id,
        EVENT_MESSAGE_STATUS_UPDATE,
        MessageStatusUpdate {
            message_id: delivered.message_id,
            status: STATUS_DELIVERED.to_string(),
            chat_id: delivered.chat_id,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DeliveredMessage;
    use crate::error::CoreError;
    use crate::events::EventTarget;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Messages {
        reads: Mutex<Vec<(Vec<String>, String, String)>>,
        fail_reads: bool,
    }

    #[async_trait]
    impl MessageStore for Messages {
        async fn mark_read(
            &self,
            message_ids: &[String],
            chat_id: &str,
            reader: &str,
        ) -> Result<(), CoreError> {
            if self.fail_reads {
                return Err(CoreError::Internal("db down".into()));
            }
            self.reads.lock().unwrap().push((
                message_ids.to_vec(),
                chat_id.to_string(),
                reader.to_string(),
            ));
            Ok(())
        }

        async fn mark_delivered(
            &self,
            message_id: &str,
        ) -> Result<Option<DeliveredMessage>, CoreError> {
            Ok((message_id == "m1").then(|| DeliveredMessage {
                message_id: "m1".into(),
                chat_id: "c1".into(),
                sender_id: "alice".into(),
            }))
        }

        async fn participants(&self, _chat_id: &str) -> Result<Vec<String>, CoreError> {
            Ok(vec!["alice".into(), "bob".into(), "carol".into()])
        }
    }

    fn read_request(user_id: Option<&str>) -> MarkMessagesRead {
        MarkMessagesRead {
            chat_id: "c1".into(),
            message_ids: vec!["m1".into(), "m2".into()],
            user_id: user_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn read_update_reaches_everyone_but_the_reader() {
        let store = Messages::default();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        mark_messages_read(&store, &bus, "bob", read_request(Some("bob"))).await;

        let mut targets = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.event_type, EVENT_MESSAGES_READ_UPDATE);
            assert_eq!(
                event.payload,
                json!({ "chatId": "c1", "messageIds": ["m1", "m2"], "readerId": "bob" })
            );
            targets.push(event.target.clone());
        }
        assert_eq!(
            targets,
            vec![
                EventTarget::Channel("user:alice".into()),
                EventTarget::Channel("user:carol".into()),
            ]
        );
    }

    #[tokio::test]
    async fn claimed_reader_is_overridden_by_connection_owner() {
        let store = Messages::default();
        let bus = EventBus::new(16);
        mark_messages_read(&store, &bus, "bob", read_request(Some("alice"))).await;
        let reads = store.reads.lock().unwrap();
        assert_eq!(reads[0].2, "bob");
    }

    #[tokio::test]
    async fn store_failure_emits_nothing() {
        let store = Messages {
            fail_reads: true,
            ..Default::default()
        };
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        mark_messages_read(&store, &bus, "bob", read_request(None)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_notifies_the_sender() {
        let store = Messages::default();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        message_delivered(
            &store,
            &bus,
            "bob",
            MessageDelivered {
                message_id: "m1".into(),
                chat_id: "c1".into(),
            },
        )
        .await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, EVENT_MESSAGE_STATUS_UPDATE);
        assert_eq!(event.target, EventTarget::Channel("user:alice".into()));
        assert_eq!(
            event.payload,
            json!({ "messageId": "m1", "status": "delivered", "chatId": "c1" })
        );
    }

    #[tokio::test]
    async fn unknown_message_delivery_is_silent() {
        let store = Messages::default();
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        message_delivered(
            &store,
            &bus,
            "bob",
            MessageDelivered {
                message_id: "missing".into(),
                chat_id: "c1".into(),
            },
        )
        .await;
        assert!(rx.try_recv().is_err());
    }
}
