use std::sync::Arc;

use anyhow::Context;
use futures::FutureExt;

use common::model::{ProgramTier, User};

use super::{Disposal, GroupOutcome, GroupReclaimer, ReclaimReport, absent_ok};
use crate::certificates::{CertificateOwner, CertificateStore};
use crate::connector::{ConnectorResult, GroupConnector, UserConnector};
use crate::dependency::EntityKind;
use crate::metrics::ReclaimMetrics;

/// Permanently removes a user with its password history, group mappings and
/// signing certificate.
///
/// Shared by [`UserReclaimer`] and the group cascade.
pub struct UserDeleter {
    users: Arc<dyn UserConnector>,
    certificates: Arc<dyn CertificateStore>,
    metrics: ReclaimMetrics,
}

impl UserDeleter {
    pub fn new(
        users: Arc<dyn UserConnector>,
        certificates: Arc<dyn CertificateStore>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            users,
            certificates,
            metrics,
        }
    }

    pub async fn delete_user(&self, user: &User) -> ConnectorResult<Disposal> {
        let certificates = self.certificates.clone();
        let metrics = self.metrics.clone();
        let id = user.id;
        let side_effect = async move {
            if let Err(e) = certificates.revoke(CertificateOwner::User(id)).await {
                metrics.record_cleanup_failure();
                tracing::warn!(user_id = %id, error = %e, "Failed to revoke user certificate");
            }
            Ok(())
        }
        .boxed();

        let result = absent_ok(self.users.delete(user, side_effect).await);
        match &result {
            Ok(Disposal::Reclaimed) => {
                self.metrics.record_reclaimed(EntityKind::User);
                tracing::info!(user_id = %user.id, tier = %user.program_tier, "Reclaimed user");
            }
            Ok(_) => {}
            // Callers log the failure with their own context
            Err(_) => self.metrics.record_failed(EntityKind::User),
        }
        result
    }
}

/// Reclaims deleted users.
///
/// Paid users are always removed. A free-trial user is only removed once its
/// sandbox group holds no content, and the sandbox group goes with it.
pub struct UserReclaimer {
    users: Arc<dyn UserConnector>,
    groups: Arc<dyn GroupConnector>,
    deleter: Arc<UserDeleter>,
    group_reclaimer: Arc<GroupReclaimer>,
    metrics: ReclaimMetrics,
}

impl UserReclaimer {
    pub fn new(
        users: Arc<dyn UserConnector>,
        groups: Arc<dyn GroupConnector>,
        deleter: Arc<UserDeleter>,
        group_reclaimer: Arc<GroupReclaimer>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            users,
            groups,
            deleter,
            group_reclaimer,
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let candidates = self
            .users
            .list_deleted()
            .await
            .context("Failed to read deleted users")?;

        let mut report = ReclaimReport::new(EntityKind::User);
        for user in &candidates {
            match self.reclaim_user(user).await {
                Ok(disposal) => report.record(disposal),
                Err(e) => {
                    tracing::error!(
                        user_id = %user.id,
                        group_id = %user.group_id,
                        tier = %user.program_tier,
                        error = %e,
                        "Failed to reclaim user"
                    );
                    report.record_failure(user.id.0, &e);
                }
            }
        }

        report.log();
        Ok(report)
    }

    pub async fn reclaim_user(&self, user: &User) -> ConnectorResult<Disposal> {
        match user.program_tier {
            ProgramTier::Paid => self.deleter.delete_user(user).await,
            ProgramTier::FreeTrial => self.reclaim_free_trial_user(user).await,
        }
    }

    async fn reclaim_free_trial_user(&self, user: &User) -> ConnectorResult<Disposal> {
        let references = self.groups.references(user.group_id).await?;
        if references.has_content() {
            self.metrics.record_retained(EntityKind::User);
            tracing::debug!(
                user_id = %user.id,
                group_id = %user.group_id,
                references = %references,
                "Free-trial group still has content, keeping user"
            );
            return Ok(Disposal::Retained);
        }

        let disposal = self.deleter.delete_user(user).await?;

        // Tear down the sandbox group unless it is already queued for deletion
        if let Some(group) = self.groups.read(user.group_id).await?
            && !group.status.is_deleted()
        {
            let outcome: GroupOutcome = self.group_reclaimer.reclaim_group(&group).await?;
            tracing::info!(
                user_id = %user.id,
                group_id = %group.id,
                group_reclaimed = outcome.reclaimed,
                "Tore down free-trial sandbox group"
            );
        }

        Ok(disposal)
    }
}
