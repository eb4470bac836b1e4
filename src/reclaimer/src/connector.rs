//! Repository-style interfaces the reclaimers consume, one per entity.
//!
//! Deletions take a [`SideEffect`]: a future performing filesystem or
//! certificate cleanup that the store awaits inside the same unit of work,
//! after the rows are removed and before the commit. An `Err` from the side
//! effect rolls the deletion back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;

use common::model::{
    CollectionId, Company, CompanyId, Contact, ContactId, DocumentCollection, Group, GroupId,
    RetentionClass, Template, TemplateId, UnknownVariant, User, UserId,
};

use crate::dependency::{EntityKind, GroupReferences};

/// Cleanup awaited inside a deletion's unit of work.
pub type SideEffect<'a> = BoxFuture<'a, anyhow::Result<()>>;

/// A side effect that does nothing.
pub fn no_side_effect() -> SideEffect<'static> {
    futures::future::ready(Ok(())).boxed()
}

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("{kind} {id} is still referenced")]
    StillReferenced { kind: EntityKind, id: i64 },

    #[error("Cleanup for {kind} {id} failed: {message}")]
    SideEffect {
        kind: EntityKind,
        id: i64,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl ConnectorError {
    /// The row is already gone; a retried deletion counts as done.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConnectorError::NotFound { .. })
    }

    pub(crate) fn side_effect(kind: EntityKind, id: i64, error: anyhow::Error) -> Self {
        ConnectorError::SideEffect {
            kind,
            id,
            message: format!("{error:#}"),
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[async_trait]
pub trait CompanyConnector: Send + Sync {
    async fn read(&self, id: CompanyId) -> ConnectorResult<Option<Company>>;

    /// Soft-deleted companies with their groups loaded.
    async fn list_deleted(&self) -> ConnectorResult<Vec<Company>>;

    /// A page of all companies ordered by id.
    async fn list_page(&self, offset: usize, limit: usize) -> ConnectorResult<Vec<Company>>;

    /// Remove the company row; refused while any group references it.
    async fn delete<'a>(
        &'a self,
        company: &'a Company,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()>;
}

#[async_trait]
pub trait GroupConnector: Send + Sync {
    /// The group with its primary users loaded.
    async fn read(&self, id: GroupId) -> ConnectorResult<Option<Group>>;

    /// Soft-deleted groups with their primary users loaded.
    async fn list_deleted(&self) -> ConnectorResult<Vec<Group>>;

    async fn references(&self, id: GroupId) -> ConnectorResult<GroupReferences>;

    /// Remove user and contact additional-group links pointing at the group.
    async fn remove_additional_mappings(&self, id: GroupId) -> ConnectorResult<u64>;

    /// Remove the group row; refused while [`GroupReferences`] is not clear.
    async fn delete(&self, group: &Group) -> ConnectorResult<()>;
}

#[async_trait]
pub trait UserConnector: Send + Sync {
    async fn list_deleted(&self) -> ConnectorResult<Vec<User>>;

    /// Make `group` the user's primary group and drop its additional mapping.
    async fn reassign_primary_group(&self, user: UserId, group: GroupId) -> ConnectorResult<()>;

    /// Remove the user with its password history and group mappings.
    async fn delete<'a>(&'a self, user: &'a User, side_effect: SideEffect<'a>)
    -> ConnectorResult<()>;
}

#[async_trait]
pub trait ContactConnector: Send + Sync {
    /// Soft-deleted contacts no signer row points at.
    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Contact>>;

    async fn list_active_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Contact>>;

    /// Remove contacts with their seals and group links in one unit of work.
    ///
    /// Contacts referenced by a signer are skipped; returns the ids removed.
    async fn delete_batch(&self, contacts: &[Contact]) -> ConnectorResult<Vec<ContactId>>;
}

#[async_trait]
pub trait TemplateConnector: Send + Sync {
    async fn read(&self, id: TemplateId) -> ConnectorResult<Option<Template>>;

    /// Soft-deleted templates no document uses.
    async fn list_deleted_unreferenced(&self) -> ConnectorResult<Vec<Template>>;

    /// One-time templates no document uses, whatever their status.
    async fn list_one_time_unreferenced(&self) -> ConnectorResult<Vec<Template>>;

    /// Templates of a group, whatever their status, that no document uses.
    async fn list_unreferenced_by_group(&self, group: GroupId) -> ConnectorResult<Vec<Template>>;

    async fn delete<'a>(
        &'a self,
        template: &'a Template,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()>;
}

#[async_trait]
pub trait DocumentCollectionConnector: Send + Sync {
    /// Live collections of a company in `class` whose retention anchor is
    /// older than `cutoff`.
    async fn list_expired(
        &self,
        company: CompanyId,
        class: RetentionClass,
        cutoff: DateTime<Utc>,
    ) -> ConnectorResult<Vec<DocumentCollection>>;

    /// Explicitly soft-deleted collections, regardless of age.
    async fn list_deleted(&self) -> ConnectorResult<Vec<DocumentCollection>>;

    async fn list_active_by_group(
        &self,
        group: GroupId,
    ) -> ConnectorResult<Vec<DocumentCollection>>;

    async fn exists(&self, id: CollectionId) -> ConnectorResult<bool>;

    /// Remove the collection and its documents.
    async fn delete<'a>(
        &'a self,
        collection: &'a DocumentCollection,
        side_effect: SideEffect<'a>,
    ) -> ConnectorResult<()>;
}

/// One handle per entity connector, resolved once when the pipeline is built.
#[derive(Clone)]
pub struct Connectors {
    pub companies: Arc<dyn CompanyConnector>,
    pub groups: Arc<dyn GroupConnector>,
    pub users: Arc<dyn UserConnector>,
    pub contacts: Arc<dyn ContactConnector>,
    pub templates: Arc<dyn TemplateConnector>,
    pub collections: Arc<dyn DocumentCollectionConnector>,
}

impl Connectors {
    /// Use one store for every entity.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CompanyConnector
            + GroupConnector
            + UserConnector
            + ContactConnector
            + TemplateConnector
            + DocumentCollectionConnector
            + 'static,
    {
        Self {
            companies: store.clone(),
            groups: store.clone(),
            users: store.clone(),
            contacts: store.clone(),
            templates: store.clone(),
            collections: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_side_effect_succeeds() {
        assert!(no_side_effect().await.is_ok());
    }

    #[test]
    fn test_not_found_detection() {
        let err = ConnectorError::NotFound {
            kind: EntityKind::Template,
            id: 4,
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "template 4 not found");

        let err = ConnectorError::side_effect(
            EntityKind::DocumentCollection,
            9,
            anyhow::anyhow!("disk full"),
        );
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("disk full"));
    }
}
