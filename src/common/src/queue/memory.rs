use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use super::{Message, MessageType, Queue, QueueConfig, QueueError, QueueResult};

const DEFAULT_CHANNEL_SIZE: usize = 1024;

/// In-process queue backed by a tokio broadcast channel.
///
/// Messages do not survive a restart; used for tests and single-node setups
/// where no broker is configured.
#[derive(Debug)]
pub struct InMemoryQueue {
    sender: Option<broadcast::Sender<Vec<u8>>>,
    receiver: Arc<Mutex<Option<broadcast::Receiver<Vec<u8>>>>>,
    subscriptions: Arc<Mutex<HashMap<MessageType, HashSet<String>>>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            sender: None,
            receiver: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait::async_trait]
impl Queue for InMemoryQueue {
    async fn connect(&mut self, _config: &QueueConfig) -> QueueResult<()> {
        let (tx, rx) = broadcast::channel(DEFAULT_CHANNEL_SIZE);
        self.sender = Some(tx);
        *self.receiver.lock().await = Some(rx);
        Ok(())
    }

    async fn publish<T>(&self, message: Message<T>) -> QueueResult<()>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| QueueError::ConnectionError("Queue not connected".to_string()))?;

        let bytes = message.to_bytes()?;

        sender
            .send(bytes)
            .map_err(|e| QueueError::PublishError(format!("Failed to publish message: {e}")))?;

        Ok(())
    }

    async fn subscribe(
        &mut self,
        message_type: MessageType,
        subtype: Option<String>,
    ) -> QueueResult<()> {
        let mut subs = self.subscriptions.lock().await;
        let subtypes = subs.entry(message_type).or_default();

        if let Some(subtype) = subtype {
            subtypes.insert(subtype);
        }

        Ok(())
    }

    async fn receive<T>(&self) -> QueueResult<Option<Message<T>>>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
    {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver
            .as_mut()
            .ok_or_else(|| QueueError::ConnectionError("Queue not connected".to_string()))?;

        let subscriptions = self.subscriptions.lock().await;

        match receiver.recv().await {
            Ok(bytes) => {
                let message = Message::from_bytes(&bytes)?;

                if let Some(subtypes) = subscriptions.get(&message.message_type)
                    && (subtypes.is_empty() || subtypes.contains(&message.subtype))
                {
                    return Ok(Some(message));
                }
                Ok(None)
            }
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "In-memory queue receiver lagged");
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> QueueResult<()> {
        self.sender = None;
        *self.receiver.lock().await = None;
        Ok(())
    }
}
