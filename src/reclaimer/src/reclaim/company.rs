use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;

use common::model::Company;

use super::{Disposal, GroupOutcome, GroupReclaimer, ReclaimReport, absent_ok};
use crate::artifacts::ArtifactStore;
use crate::connector::{CompanyConnector, ConnectorError, ConnectorResult, GroupConnector};
use crate::dependency::{CompanyReferences, EntityKind};
use crate::metrics::ReclaimMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanyOutcome {
    /// The company row and its assets are gone.
    Reclaimed,
    AlreadyAbsent,
    /// Live groups were handed to the group cascade; the company waits for
    /// a later run.
    Delegated(Vec<GroupOutcome>),
    /// Only soft-deleted groups remain; the group reclaimer will get to them.
    AwaitingGroups(CompanyReferences),
}

/// Reclaims deleted companies once they have no groups left.
pub struct CompanyReclaimer {
    companies: Arc<dyn CompanyConnector>,
    groups: Arc<dyn GroupConnector>,
    group_reclaimer: Arc<GroupReclaimer>,
    artifacts: Arc<dyn ArtifactStore>,
    metrics: ReclaimMetrics,
}

impl CompanyReclaimer {
    pub fn new(
        companies: Arc<dyn CompanyConnector>,
        groups: Arc<dyn GroupConnector>,
        group_reclaimer: Arc<GroupReclaimer>,
        artifacts: Arc<dyn ArtifactStore>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            companies,
            groups,
            group_reclaimer,
            artifacts,
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let candidates = self
            .companies
            .list_deleted()
            .await
            .context("Failed to read deleted companies")?;

        let mut report = ReclaimReport::new(EntityKind::Company);
        for company in &candidates {
            match self.reclaim_company(company).await {
                Ok(CompanyOutcome::Reclaimed) => report.record(Disposal::Reclaimed),
                Ok(CompanyOutcome::AlreadyAbsent) => report.record(Disposal::AlreadyAbsent),
                Ok(_) => report.record(Disposal::Retained),
                Err(e) => {
                    self.metrics.record_failed(EntityKind::Company);
                    tracing::error!(
                        company_id = %company.id,
                        error = %e,
                        "Failed to reclaim company"
                    );
                    report.record_failure(company.id.0, &e);
                }
            }
        }

        report.log();
        Ok(report)
    }

    pub async fn reclaim_company(&self, company: &Company) -> ConnectorResult<CompanyOutcome> {
        let references = CompanyReferences::of(company);

        if references.is_clear() {
            return self.delete_company(company).await;
        }

        if references.active_groups == 0 {
            self.metrics.record_retained(EntityKind::Company);
            tracing::debug!(
                company_id = %company.id,
                groups = references.groups,
                "Company still has deleted groups awaiting reclamation"
            );
            return Ok(CompanyOutcome::AwaitingGroups(references));
        }

        let mut outcomes = Vec::with_capacity(references.active_groups as usize);
        for summary in company.active_groups() {
            let Some(group) = self.groups.read(summary.id).await? else {
                continue;
            };
            outcomes.push(self.group_reclaimer.reclaim_group(&group).await?);
        }

        self.metrics.record_retained(EntityKind::Company);
        tracing::info!(
            company_id = %company.id,
            groups = outcomes.len(),
            groups_reclaimed = outcomes.iter().filter(|o| o.reclaimed).count(),
            "Delegated live groups of deleted company"
        );
        Ok(CompanyOutcome::Delegated(outcomes))
    }

    async fn delete_company(&self, company: &Company) -> ConnectorResult<CompanyOutcome> {
        let artifacts = self.artifacts.clone();
        let metrics = self.metrics.clone();
        let id = company.id;
        let side_effect = async move {
            if let Err(e) = artifacts.delete_company_assets(id).await {
                metrics.record_cleanup_failure();
                tracing::warn!(company_id = %id, error = %e, "Failed to delete company assets");
            }
            Ok(())
        }
        .boxed();

        match absent_ok(self.companies.delete(company, side_effect).await) {
            Ok(Disposal::Reclaimed) => {
                self.metrics.record_reclaimed(EntityKind::Company);
                tracing::info!(company_id = %company.id, name = %company.name, "Reclaimed company");
                Ok(CompanyOutcome::Reclaimed)
            }
            Ok(_) => Ok(CompanyOutcome::AlreadyAbsent),
            Err(ConnectorError::StillReferenced { .. }) => {
                // A group appeared since the company was read
                self.metrics.record_retained(EntityKind::Company);
                Ok(CompanyOutcome::AwaitingGroups(CompanyReferences {
                    groups: 1,
                    active_groups: 0,
                }))
            }
            Err(e) => Err(e),
        }
    }
}
