use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::model::{CollectionId, CompanyId, DocumentCollection, GroupId, UserId};
use common::queue::{Message, Queue};
use serde::{Deserialize, Serialize};

/// Queue message subtype of [`DocumentDeleted`].
pub const DOCUMENT_DELETED_SUBTYPE: &str = "document_deleted";

/// Sent when a collection is removed because its retention interval passed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDeleted {
    pub collection_id: CollectionId,
    pub company_id: Option<CompanyId>,
    pub group_id: GroupId,
    pub owner_id: UserId,
    pub deleted_at: DateTime<Utc>,
}

impl DocumentDeleted {
    pub fn new(
        collection: &DocumentCollection,
        company_id: Option<CompanyId>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            collection_id: collection.id,
            company_id,
            group_id: collection.group_id,
            owner_id: collection.user_id,
            deleted_at,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn document_deleted(&self, event: &DocumentDeleted) -> anyhow::Result<()>;
}

pub struct QueueNotifier<Q: Queue> {
    queue: Arc<Q>,
}

impl<Q: Queue> QueueNotifier<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<Q: Queue> Notifier for QueueNotifier<Q> {
    async fn document_deleted(&self, event: &DocumentDeleted) -> anyhow::Result<()> {
        self.queue
            .publish(Message::notification(
                DOCUMENT_DELETED_SUBTYPE,
                event.clone(),
            ))
            .await?;
        Ok(())
    }
}
