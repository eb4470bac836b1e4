use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;

use common::model::{Contact, ContactId, GroupId};

use super::{Disposal, ReclaimReport};
use crate::artifacts::ArtifactStore;
use crate::certificates::{CertificateOwner, CertificateStore};
use crate::connector::{ConnectorResult, ContactConnector};
use crate::dependency::EntityKind;
use crate::metrics::ReclaimMetrics;

/// Contacts removed and skipped while tearing down a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactCascade {
    pub removed: usize,
    /// Still referenced by a signer; never reclaimed.
    pub retained: usize,
}

/// Reclaims deleted contacts that no signer row points at.
///
/// Rows go in one batch; seal images and certificates follow best-effort.
pub struct ContactReclaimer {
    contacts: Arc<dyn ContactConnector>,
    artifacts: Arc<dyn ArtifactStore>,
    certificates: Arc<dyn CertificateStore>,
    metrics: ReclaimMetrics,
}

impl ContactReclaimer {
    pub fn new(
        contacts: Arc<dyn ContactConnector>,
        artifacts: Arc<dyn ArtifactStore>,
        certificates: Arc<dyn CertificateStore>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            contacts,
            artifacts,
            certificates,
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let candidates = self
            .contacts
            .list_deleted_unreferenced()
            .await
            .context("Failed to read deleted contacts")?;

        let mut report = ReclaimReport::new(EntityKind::Contact);
        if candidates.is_empty() {
            report.log();
            return Ok(report);
        }

        let removed = self
            .delete_batch(&candidates)
            .await
            .with_context(|| format!("Failed to delete batch of {} contacts", candidates.len()))?;

        for contact in &candidates {
            if removed.contains(&contact.id) {
                report.record(Disposal::Reclaimed);
            } else {
                report.record(Disposal::Retained);
            }
        }

        report.log();
        Ok(report)
    }

    /// Live contacts of a group being torn down.
    pub async fn reclaim_group_contacts(&self, group: GroupId) -> ConnectorResult<ContactCascade> {
        let candidates = self.contacts.list_active_by_group(group).await?;
        if candidates.is_empty() {
            return Ok(ContactCascade::default());
        }

        let removed = self.delete_batch(&candidates).await?;
        let retained = candidates.len() - removed.len();
        if retained > 0 {
            tracing::info!(
                group_id = %group,
                retained,
                "Keeping contacts referenced by signers"
            );
        }

        Ok(ContactCascade {
            removed: removed.len(),
            retained,
        })
    }

    async fn delete_batch(
        &self,
        candidates: &[Contact],
    ) -> ConnectorResult<HashSet<ContactId>> {
        let removed: HashSet<_> = match self.contacts.delete_batch(candidates).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                for _ in candidates {
                    self.metrics.record_failed(EntityKind::Contact);
                }
                return Err(e);
            }
        };

        for contact in candidates {
            if removed.contains(&contact.id) {
                self.metrics.record_reclaimed(EntityKind::Contact);
                tracing::info!(contact_id = %contact.id, "Reclaimed contact");
                self.purge_contact_artifacts(contact).await;
            } else {
                self.metrics.record_retained(EntityKind::Contact);
                tracing::debug!(
                    contact_id = %contact.id,
                    "Contact is referenced by a signer, keeping it"
                );
            }
        }

        Ok(removed)
    }

    /// Remove seal images and revoke the signing certificate.
    ///
    /// Failures are logged and counted; returns how many cleanups failed.
    pub async fn purge_contact_artifacts(&self, contact: &Contact) -> usize {
        let mut failures = 0;

        for seal in &contact.seals {
            if let Err(e) = self.artifacts.delete_seal_image(contact.id, *seal).await {
                failures += 1;
                tracing::warn!(
                    contact_id = %contact.id,
                    seal_id = %seal,
                    error = %e,
                    "Failed to delete seal image"
                );
            }
        }

        if let Err(e) = self
            .certificates
            .revoke(CertificateOwner::Contact(contact.id))
            .await
        {
            failures += 1;
            tracing::warn!(
                contact_id = %contact.id,
                error = %e,
                "Failed to revoke contact certificate"
            );
        }

        for _ in 0..failures {
            self.metrics.record_cleanup_failure();
        }
        failures
    }
}
