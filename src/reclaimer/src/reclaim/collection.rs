use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::FutureExt;

use common::model::{Company, DocumentCollection, GroupId, RetentionClass, Template};

use super::{Disposal, ReclaimReport, Trigger, absent_ok};
use crate::artifacts::ArtifactStore;
use crate::audit::{AuditSink, AuditSnapshot, DocumentDeleted, Notifier};
use crate::connector::{
    CompanyConnector, ConnectorResult, DocumentCollectionConnector, GroupConnector,
    TemplateConnector,
};
use crate::dependency::EntityKind;
use crate::metrics::ReclaimMetrics;
use crate::retention::RetentionPolicyResolver;

/// Reclaims document collections past their retention interval and those
/// explicitly soft-deleted.
///
/// Every collection is audited before its storage goes. Its files are
/// removed inside the row deletion, so a file failure keeps the row.
pub struct DocumentCollectionReclaimer {
    companies: Arc<dyn CompanyConnector>,
    groups: Arc<dyn GroupConnector>,
    templates: Arc<dyn TemplateConnector>,
    collections: Arc<dyn DocumentCollectionConnector>,
    artifacts: Arc<dyn ArtifactStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    resolver: RetentionPolicyResolver,
    company_batch_size: usize,
    metrics: ReclaimMetrics,
}

impl DocumentCollectionReclaimer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        companies: Arc<dyn CompanyConnector>,
        groups: Arc<dyn GroupConnector>,
        templates: Arc<dyn TemplateConnector>,
        collections: Arc<dyn DocumentCollectionConnector>,
        artifacts: Arc<dyn ArtifactStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
        resolver: RetentionPolicyResolver,
        company_batch_size: usize,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            companies,
            groups,
            templates,
            collections,
            artifacts,
            audit,
            notifier,
            resolver,
            company_batch_size: company_batch_size.max(1),
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let mut report = self.reclaim_expired(Utc::now()).await?;
        report.merge(self.reclaim_soft_deleted().await?);
        report.log();
        Ok(report)
    }

    /// Scan every company page by page and reclaim live collections whose
    /// retention interval has passed at `now`.
    pub async fn reclaim_expired(&self, now: DateTime<Utc>) -> anyhow::Result<ReclaimReport> {
        let mut report = ReclaimReport::new(EntityKind::DocumentCollection);
        let mut offset = 0;

        loop {
            let page = self
                .companies
                .list_page(offset, self.company_batch_size)
                .await
                .with_context(|| format!("Failed to read companies at offset {offset}"))?;

            for company in &page {
                for class in [RetentionClass::Signed, RetentionClass::Unsigned] {
                    self.reclaim_expired_in_class(company, class, now, &mut report)
                        .await?;
                }
            }

            if page.len() < self.company_batch_size {
                break;
            }
            offset += page.len();
        }

        Ok(report)
    }

    async fn reclaim_expired_in_class(
        &self,
        company: &Company,
        class: RetentionClass,
        now: DateTime<Utc>,
        report: &mut ReclaimReport,
    ) -> anyhow::Result<()> {
        let cutoff = match self.resolver.compute_cutoff(company, class, now) {
            Ok(Some(cutoff)) => cutoff,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    company_id = %company.id,
                    class = %class,
                    error = %e,
                    "Skipping company with unusable retention policy"
                );
                return Ok(());
            }
        };

        let expired = self
            .collections
            .list_expired(company.id, class, cutoff.cutoff)
            .await
            .with_context(|| format!("Failed to read expired collections ({})", cutoff.display()))?;

        if !expired.is_empty() {
            tracing::debug!(
                company_id = %company.id,
                class = %class,
                candidates = expired.len(),
                source = %cutoff.source,
                "Found expired document collections"
            );
        }

        for collection in &expired {
            match self
                .reclaim_with_company(collection, Trigger::Retention, Some(company))
                .await
            {
                Ok(disposal) => report.record(disposal),
                Err(e) => report.record_failure(collection.id.0, &e),
            }
        }

        Ok(())
    }

    /// Reclaim every explicitly soft-deleted collection regardless of age.
    pub async fn reclaim_soft_deleted(&self) -> anyhow::Result<ReclaimReport> {
        let mut report = ReclaimReport::new(EntityKind::DocumentCollection);

        let deleted = self
            .collections
            .list_deleted()
            .await
            .context("Failed to read soft-deleted document collections")?;

        for collection in &deleted {
            match self.reclaim_collection(collection, Trigger::SoftDeleted).await {
                Ok(disposal) => report.record(disposal),
                Err(e) => report.record_failure(collection.id.0, &e),
            }
        }

        Ok(report)
    }

    /// Live collections of a group being torn down; stops at the first failure.
    pub async fn reclaim_group_collections(&self, group: GroupId) -> ConnectorResult<usize> {
        let mut reclaimed = 0;
        for collection in self.collections.list_active_by_group(group).await? {
            if self.reclaim_collection(&collection, Trigger::Cascade).await? == Disposal::Reclaimed
            {
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    /// Audit, then delete files and row together.
    pub async fn reclaim_collection(
        &self,
        collection: &DocumentCollection,
        trigger: Trigger,
    ) -> ConnectorResult<Disposal> {
        self.reclaim_with_company(collection, trigger, None).await
    }

    async fn reclaim_with_company(
        &self,
        collection: &DocumentCollection,
        trigger: Trigger,
        company: Option<&Company>,
    ) -> ConnectorResult<Disposal> {
        let result = self.reclaim_inner(collection, trigger, company).await;
        match &result {
            Ok(Disposal::Reclaimed) => self.metrics.record_reclaimed(EntityKind::DocumentCollection),
            Ok(_) => {}
            Err(e) => {
                self.metrics.record_failed(EntityKind::DocumentCollection);
                tracing::error!(
                    collection_id = %collection.id,
                    trigger = %trigger,
                    error = %e,
                    "Failed to reclaim document collection"
                );
            }
        }
        result
    }

    async fn reclaim_inner(
        &self,
        collection: &DocumentCollection,
        trigger: Trigger,
        company: Option<&Company>,
    ) -> ConnectorResult<Disposal> {
        // A retry after a completed delete must not audit twice
        if !self.collections.exists(collection.id).await? {
            return Ok(Disposal::AlreadyAbsent);
        }

        let resolved;
        let company = match company {
            Some(company) => Some(company),
            None => {
                resolved = self.resolve_company(collection.group_id).await?;
                resolved.as_ref()
            }
        };

        let templates = self.load_templates(collection).await?;
        let now = Utc::now();
        let snapshot = AuditSnapshot::capture(collection, company, &templates, trigger, now);
        self.forward_audit(&snapshot).await;

        let artifacts = self.artifacts.clone();
        let id = collection.id;
        let side_effect = async move {
            artifacts
                .delete_collection_artifacts(id)
                .await
                .map(|_| ())
        }
        .boxed();

        let disposal = absent_ok(self.collections.delete(collection, side_effect).await)?;

        if disposal == Disposal::Reclaimed {
            tracing::info!(
                collection_id = %collection.id,
                trigger = %trigger,
                "Reclaimed document collection"
            );
            if trigger.notifies() {
                self.notify(DocumentDeleted::new(collection, company.map(|c| c.id), now))
                    .await;
            }
        }

        Ok(disposal)
    }

    async fn resolve_company(&self, group: GroupId) -> ConnectorResult<Option<Company>> {
        match self.groups.read(group).await? {
            Some(group) => self.companies.read(group.company_id).await,
            None => Ok(None),
        }
    }

    async fn load_templates(&self, collection: &DocumentCollection) -> ConnectorResult<Vec<Template>> {
        let ids: BTreeSet<_> = collection.documents.iter().map(|d| d.template_id).collect();
        let mut templates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(template) = self.templates.read(id).await? {
                templates.push(template);
            }
        }
        Ok(templates)
    }

    async fn forward_audit(&self, snapshot: &AuditSnapshot) {
        match self.audit.forward(snapshot).await {
            Ok(()) => self.metrics.record_audit_forwarded(),
            Err(e) => {
                self.metrics.record_audit_failed();
                tracing::error!(
                    collection_id = %snapshot.collection_id,
                    channel = ?self.audit.channel(),
                    error = %e,
                    "Failed to forward audit snapshot"
                );
            }
        }
    }

    async fn notify(&self, event: DocumentDeleted) {
        match self.notifier.document_deleted(&event).await {
            Ok(()) => self.metrics.record_notification_sent(),
            Err(e) => {
                self.metrics.record_notification_failed();
                tracing::warn!(
                    collection_id = %event.collection_id,
                    error = %e,
                    "Failed to send DocumentDeleted notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::{self, Harness};
    use chrono::Duration;
    use common::model::{CollectionId, CollectionStatus};

    #[tokio::test]
    async fn test_signed_collection_past_company_retention() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company_with_retention(1, Some(30), None)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let old = harness
            .store
            .insert_collection(testing::signed_collection(100, group.id, Duration::days(40)))
            .await;
        let recent = harness
            .store
            .insert_collection(testing::signed_collection(101, group.id, Duration::days(10)))
            .await;

        let report = harness.pipeline.collections().run().await.unwrap();

        assert_eq!(report.reclaimed, 1);
        assert!(!harness.store.has_collection(old.id).await);
        assert!(harness.store.has_collection(recent.id).await);
        assert_eq!(harness.notifier.events().await.len(), 1);
        assert_eq!(harness.audit.snapshots().await[0].company_name.as_deref(), Some("Company 1"));
    }

    #[tokio::test]
    async fn test_soft_deleted_collection_reclaimed_regardless_of_age() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let mut collection = testing::draft_collection(100, group.id, Duration::hours(1));
        collection.status = CollectionStatus::Deleted;
        harness.store.insert_collection(collection).await;

        let report = harness.pipeline.collections().run().await.unwrap();

        assert_eq!(report.reclaimed, 1);
        assert!(!harness.store.has_collection(CollectionId(100)).await);
        assert_eq!(harness.audit.snapshots().await.len(), 1);
        // Explicit soft-deletes are not announced
        assert!(harness.notifier.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_artifact_failure_keeps_row() {
        let harness = Harness::with_failing_artifacts();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let mut collection = testing::draft_collection(100, group.id, Duration::hours(1));
        collection.status = CollectionStatus::Deleted;
        harness.store.insert_collection(collection).await;

        let report = harness.pipeline.collections().run().await.unwrap();

        assert_eq!(report.failed(), 1);
        assert!(harness.store.has_collection(CollectionId(100)).await);
        assert_eq!(harness.metrics.failed(EntityKind::DocumentCollection), 1);
    }

    #[tokio::test]
    async fn test_retry_of_missing_collection_is_success() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let collection = testing::draft_collection(100, group.id, Duration::hours(1));

        // Never stored: the delete reports not found
        let disposal = harness
            .pipeline
            .collections()
            .reclaim_collection(&collection, Trigger::Retention)
            .await
            .unwrap();

        assert_eq!(disposal, Disposal::AlreadyAbsent);
        assert!(harness.notifier.events().await.is_empty());
        assert!(harness.audit.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_reclaiming_twice_audits_once() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let collection = harness
            .store
            .insert_collection(testing::draft_collection(100, group.id, Duration::hours(1)))
            .await;

        let reclaimer = harness.pipeline.collections();
        let first = reclaimer
            .reclaim_collection(&collection, Trigger::SoftDeleted)
            .await
            .unwrap();
        let second = reclaimer
            .reclaim_collection(&collection, Trigger::SoftDeleted)
            .await
            .unwrap();

        assert_eq!(first, Disposal::Reclaimed);
        assert_eq!(second, Disposal::AlreadyAbsent);
        assert_eq!(harness.audit.snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_block_deletion() {
        let harness = Harness::new();
        harness.audit.fail_next().await;
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let mut collection = testing::draft_collection(100, group.id, Duration::hours(1));
        collection.status = CollectionStatus::Deleted;
        harness.store.insert_collection(collection).await;

        let report = harness.pipeline.collections().run().await.unwrap();

        assert_eq!(report.reclaimed, 1);
        assert_eq!(harness.metrics.audits_failed(), 1);
    }

    #[tokio::test]
    async fn test_company_pages_are_walked() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::with_store_and_batch(store, 2);
        for id in 1..=5 {
            let company = harness
                .store
                .insert_company(testing::company_with_retention(id, None, Some(1)))
                .await;
            let group = harness
                .store
                .insert_group(testing::group(id * 10, company.id))
                .await;
            harness
                .store
                .insert_collection(testing::draft_collection(
                    id * 100,
                    group.id,
                    Duration::days(2),
                ))
                .await;
        }

        let report = harness.pipeline.collections().run().await.unwrap();

        assert_eq!(report.reclaimed, 5);
        assert_eq!(harness.notifier.events().await.len(), 5);
    }
}
