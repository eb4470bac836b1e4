use std::collections::HashMap;
use std::sync::Arc;

use async_nats::Client;
use async_nats::jetstream::{
    self, Context,
    consumer::{self, PullConsumer},
    stream,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::RwLock;

use super::{Message, MessageType, Queue, QueueConfig, QueueError, QueueResult};

/// Durable queue on NATS JetStream.
///
/// Every message is published to `{stream}.{type}.{subtype}`; the stream is
/// created on connect and captures `{stream}.>`.
#[derive(Debug)]
pub struct NatsQueue {
    client: Option<Client>,
    js_context: Option<Context>,
    consumers: Arc<RwLock<HashMap<String, PullConsumer>>>,
    stream_name: String,
}

impl Default for NatsQueue {
    fn default() -> Self {
        Self {
            client: None,
            js_context: None,
            consumers: Arc::new(RwLock::new(HashMap::new())),
            stream_name: "quill".to_string(),
        }
    }
}

impl NatsQueue {
    /// Durable consumer name for a message type and optional subtype
    fn consumer_key(message_type: &MessageType, subtype: Option<&str>) -> String {
        match subtype {
            Some(sub) => format!("{}_{}", message_type.subject(), sub),
            None => message_type.subject(),
        }
    }

    /// Full subject for a message type and optional subtype
    fn subject(&self, message_type: &MessageType, subtype: Option<&str>) -> String {
        match subtype {
            Some(sub) => format!("{}.{}.{}", self.stream_name, message_type.subject(), sub),
            None => format!("{}.{}.>", self.stream_name, message_type.subject()),
        }
    }

    fn context(&self) -> QueueResult<&Context> {
        self.js_context
            .as_ref()
            .ok_or_else(|| QueueError::ConnectionError("Not connected".to_string()))
    }
}

#[async_trait]
impl Queue for NatsQueue {
    async fn connect(&mut self, config: &QueueConfig) -> QueueResult<()> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::ConnectionError(e.to_string()))?;

        let js_context = jetstream::new(client.clone());
        self.stream_name = config.stream.clone();

        js_context
            .get_or_create_stream(stream::Config {
                name: self.stream_name.clone(),
                subjects: vec![format!("{}.>", self.stream_name)],
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::ConnectionError(e.to_string()))?;

        self.client = Some(client);
        self.js_context = Some(js_context);

        Ok(())
    }

    async fn publish<T>(&self, message: Message<T>) -> QueueResult<()>
    where
        T: serde::Serialize + for<'a> serde::Deserialize<'a> + Send + Sync,
    {
        let js = self.context()?;
        let subject = self.subject(&message.message_type, Some(&message.subtype));

        let payload = message
            .to_bytes()
            .map_err(|e| QueueError::PublishError(e.to_string()))?;

        // Wait for the server ack so the message is durable before returning
        js.publish(subject, payload.into())
            .await
            .map_err(|e| QueueError::PublishError(e.to_string()))?
            .await
            .map_err(|e| QueueError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &mut self,
        message_type: MessageType,
        subtype: Option<String>,
    ) -> QueueResult<()> {
        let js = self.context()?;

        let consumer_key = Self::consumer_key(&message_type, subtype.as_deref());
        let filter_subject = self.subject(&message_type, subtype.as_deref());

        let stream = js
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| QueueError::SubscribeError(e.to_string()))?;

        let consumer = stream
            .create_consumer(consumer::pull::Config {
                durable_name: Some(consumer_key.clone()),
                filter_subject,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::SubscribeError(e.to_string()))?;

        self.consumers.write().await.insert(consumer_key, consumer);

        Ok(())
    }

    async fn receive<T>(&self) -> QueueResult<Option<Message<T>>>
    where
        T: serde::Serialize + for<'a> serde::Deserialize<'a> + Send + Sync,
    {
        let consumers = self.consumers.read().await;

        for consumer in consumers.values() {
            let mut messages = consumer
                .fetch()
                .max_messages(1)
                .messages()
                .await
                .map_err(|e| QueueError::ReceiveError(e.to_string()))?;

            if let Some(Ok(message)) = messages.next().await {
                let decoded = Message::from_bytes(&message.payload)?;
                message
                    .ack()
                    .await
                    .map_err(|e| QueueError::ReceiveError(e.to_string()))?;
                return Ok(Some(decoded));
            }
        }

        Ok(None)
    }

    async fn close(&mut self) -> QueueResult<()> {
        if let Some(client) = self.client.take() {
            client
                .flush()
                .await
                .map_err(|e| QueueError::ConnectionError(e.to_string()))?;
        }
        self.js_context = None;
        self.consumers.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_are_prefixed_with_stream() {
        let queue = NatsQueue::default();
        assert_eq!(
            queue.subject(&MessageType::Audit, Some("document_collection")),
            "quill.audit.document_collection"
        );
        assert_eq!(
            queue.subject(&MessageType::Notification, None),
            "quill.notification.>"
        );
    }

    #[test]
    fn test_consumer_key() {
        assert_eq!(
            NatsQueue::consumer_key(&MessageType::Notification, Some("document_deleted")),
            "notification_document_deleted"
        );
        assert_eq!(NatsQueue::consumer_key(&MessageType::Audit, None), "audit");
    }

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let queue = NatsQueue::default();
        let result = queue
            .publish(Message::audit("document_collection", 1_i64))
            .await;
        assert!(matches!(result, Err(QueueError::ConnectionError(_))));
    }
}
