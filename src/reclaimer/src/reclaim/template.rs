use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;

use common::model::{GroupId, Template};

use super::{Disposal, ReclaimReport, absent_ok};
use crate::artifacts::ArtifactStore;
use crate::connector::{ConnectorResult, TemplateConnector};
use crate::dependency::EntityKind;
use crate::metrics::ReclaimMetrics;

/// Reclaims deleted templates and one-time templates no document uses.
///
/// The row is the source of truth: the rendered PDF is removed best-effort.
pub struct TemplateReclaimer {
    templates: Arc<dyn TemplateConnector>,
    artifacts: Arc<dyn ArtifactStore>,
    metrics: ReclaimMetrics,
}

impl TemplateReclaimer {
    pub fn new(
        templates: Arc<dyn TemplateConnector>,
        artifacts: Arc<dyn ArtifactStore>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            templates,
            artifacts,
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let deleted = self
            .templates
            .list_deleted_unreferenced()
            .await
            .context("Failed to read deleted templates")?;
        let one_time = self
            .templates
            .list_one_time_unreferenced()
            .await
            .context("Failed to read one-time templates")?;

        let mut report = ReclaimReport::new(EntityKind::Template);
        let mut seen = HashSet::new();

        for template in deleted.iter().chain(one_time.iter()) {
            if !seen.insert(template.id) {
                continue;
            }
            match self.reclaim_template(template).await {
                Ok(disposal) => report.record(disposal),
                Err(e) => report.record_failure(template.id.0, &e),
            }
        }

        report.log();
        Ok(report)
    }

    /// Templates of a group being torn down that no document uses; stops at
    /// the first failure. Templates still rendered into a document stay, so
    /// the collection audit can read their field types.
    pub async fn reclaim_group_templates(&self, group: GroupId) -> ConnectorResult<usize> {
        let mut reclaimed = 0;
        for template in self.templates.list_unreferenced_by_group(group).await? {
            if self.reclaim_template(&template).await? == Disposal::Reclaimed {
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    pub async fn reclaim_template(&self, template: &Template) -> ConnectorResult<Disposal> {
        let artifacts = self.artifacts.clone();
        let metrics = self.metrics.clone();
        let id = template.id;
        let side_effect = async move {
            if let Err(e) = artifacts.delete_template_pdf(id).await {
                metrics.record_cleanup_failure();
                tracing::warn!(
                    template_id = %id,
                    error = %e,
                    "Failed to delete template PDF, removing row anyway"
                );
            }
            Ok(())
        }
        .boxed();

        let result = absent_ok(self.templates.delete(template, side_effect).await);
        match &result {
            Ok(Disposal::Reclaimed) => {
                self.metrics.record_reclaimed(EntityKind::Template);
                tracing::info!(
                    template_id = %template.id,
                    one_time = template.is_one_time,
                    "Reclaimed template"
                );
            }
            Ok(_) => {}
            Err(e) => {
                self.metrics.record_failed(EntityKind::Template);
                tracing::error!(template_id = %template.id, error = %e, "Failed to reclaim template");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Harness};
    use common::model::{EntityStatus, TemplateId};

    #[tokio::test]
    async fn test_pdf_failure_still_removes_row() {
        let harness = Harness::with_failing_artifacts();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let mut template = testing::template(20, group.id);
        template.status = EntityStatus::Deleted;
        harness.store.insert_template(template).await;

        let report = harness.pipeline.templates().run().await.unwrap();

        assert_eq!(report.reclaimed, 1);
        assert!(!harness.store.has_template(TemplateId(20)).await);
        assert_eq!(harness.metrics.cleanup_failures(), 1);
    }

    #[tokio::test]
    async fn test_one_time_and_deleted_sets() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;

        // Deleted and one-time: listed twice, reclaimed once
        let mut both = testing::template(20, group.id);
        both.status = EntityStatus::Deleted;
        both.is_one_time = true;
        harness.store.insert_template(both).await;

        let mut one_time = testing::template(21, group.id);
        one_time.is_one_time = true;
        harness.store.insert_template(one_time).await;

        // Active, reusable: untouched
        harness.store.insert_template(testing::template(22, group.id)).await;

        let report = harness.pipeline.templates().run().await.unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.reclaimed, 2);
        assert!(harness.store.has_template(TemplateId(22)).await);
    }

    #[tokio::test]
    async fn test_referenced_template_is_not_a_candidate() {
        let harness = Harness::new();
        let company = harness.store.insert_company(testing::company(1)).await;
        let group = harness.store.insert_group(testing::group(10, company.id)).await;
        let mut template = testing::template(20, group.id);
        template.status = EntityStatus::Deleted;
        harness.store.insert_template(template).await;

        let mut collection =
            testing::draft_collection(100, group.id, chrono::Duration::hours(1));
        collection.documents = vec![testing::document(1000, TemplateId(20))];
        harness.store.insert_collection(collection).await;

        let report = harness.pipeline.templates().run().await.unwrap();

        assert_eq!(report.candidates, 0);
        assert!(harness.store.has_template(TemplateId(20)).await);
    }
}
