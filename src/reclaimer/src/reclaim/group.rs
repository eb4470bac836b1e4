use std::sync::Arc;

use anyhow::Context;

use common::model::{Group, GroupId, User, UserId};

use super::{
    ContactReclaimer, Disposal, DocumentCollectionReclaimer, ReclaimReport, TemplateReclaimer,
    UserDeleter,
};
use crate::connector::{ConnectorError, ConnectorResult, GroupConnector, UserConnector};
use crate::dependency::{EntityKind, GroupReferences};
use crate::metrics::ReclaimMetrics;

/// What tearing down one group achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome {
    pub group_id: GroupId,
    pub contacts_removed: usize,
    pub contacts_retained: usize,
    pub templates_removed: usize,
    pub collections_removed: usize,
    pub mappings_removed: u64,
    /// Users moved to another group instead of being deleted.
    pub users_reassigned: Vec<(UserId, GroupId)>,
    pub users_removed: usize,
    /// References left after the cascade.
    pub remaining: GroupReferences,
    /// The group row is gone.
    pub reclaimed: bool,
}

impl GroupOutcome {
    fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            contacts_removed: 0,
            contacts_retained: 0,
            templates_removed: 0,
            collections_removed: 0,
            mappings_removed: 0,
            users_reassigned: Vec::new(),
            users_removed: 0,
            remaining: GroupReferences::default(),
            reclaimed: false,
        }
    }
}

/// Tears down deleted groups: children first, then the group row once
/// nothing references it.
pub struct GroupReclaimer {
    groups: Arc<dyn GroupConnector>,
    users: Arc<dyn UserConnector>,
    contacts: Arc<ContactReclaimer>,
    templates: Arc<TemplateReclaimer>,
    collections: Arc<DocumentCollectionReclaimer>,
    deleter: Arc<UserDeleter>,
    metrics: ReclaimMetrics,
}

impl GroupReclaimer {
    pub fn new(
        groups: Arc<dyn GroupConnector>,
        users: Arc<dyn UserConnector>,
        contacts: Arc<ContactReclaimer>,
        templates: Arc<TemplateReclaimer>,
        collections: Arc<DocumentCollectionReclaimer>,
        deleter: Arc<UserDeleter>,
        metrics: ReclaimMetrics,
    ) -> Self {
        Self {
            groups,
            users,
            contacts,
            templates,
            collections,
            deleter,
            metrics,
        }
    }

    pub async fn run(&self) -> anyhow::Result<ReclaimReport> {
        let candidates = self
            .groups
            .list_deleted()
            .await
            .context("Failed to read deleted groups")?;

        let mut report = ReclaimReport::new(EntityKind::Group);
        for group in &candidates {
            match self.reclaim_group(group).await {
                Ok(outcome) if outcome.reclaimed => report.record(Disposal::Reclaimed),
                Ok(_) => report.record(Disposal::Retained),
                Err(e) => report.record_failure(group.id.0, &e),
            }
        }

        report.log();
        Ok(report)
    }

    /// Cascade through the group's children, then remove the group.
    ///
    /// Steps that completed before a failure stay done; the next run resumes.
    pub async fn reclaim_group(&self, group: &Group) -> ConnectorResult<GroupOutcome> {
        match self.cascade(group).await {
            Ok(outcome) => {
                if outcome.reclaimed {
                    self.metrics.record_reclaimed(EntityKind::Group);
                    tracing::info!(
                        group_id = %group.id,
                        users_reassigned = outcome.users_reassigned.len(),
                        users_removed = outcome.users_removed,
                        "Reclaimed group"
                    );
                } else {
                    self.metrics.record_retained(EntityKind::Group);
                    tracing::info!(
                        group_id = %group.id,
                        remaining = %outcome.remaining,
                        "Group is still referenced, keeping it"
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.record_failed(EntityKind::Group);
                tracing::error!(
                    group_id = %group.id,
                    company_id = %group.company_id,
                    error = %e,
                    "Failed to reclaim group"
                );
                Err(e)
            }
        }
    }

    async fn cascade(&self, group: &Group) -> ConnectorResult<GroupOutcome> {
        let mut outcome = GroupOutcome::new(group.id);

        let contacts = self.contacts.reclaim_group_contacts(group.id).await?;
        outcome.contacts_removed = contacts.removed;
        outcome.contacts_retained = contacts.retained;

        outcome.templates_removed = self.templates.reclaim_group_templates(group.id).await?;
        outcome.collections_removed = self.collections.reclaim_group_collections(group.id).await?;
        // Templates the group's own collections used are free now
        outcome.templates_removed += self.templates.reclaim_group_templates(group.id).await?;
        outcome.mappings_removed = self.groups.remove_additional_mappings(group.id).await?;

        // Reassignment must happen before deletion so moved users survive
        let mut doomed = Vec::new();
        for user in &group.users {
            match self.reassignment_target(user, group.id).await? {
                Some(target) => {
                    self.users.reassign_primary_group(user.id, target).await?;
                    self.metrics.record_user_reassigned();
                    tracing::info!(
                        user_id = %user.id,
                        from_group = %group.id,
                        to_group = %target,
                        "Reassigned user to alternate group"
                    );
                    outcome.users_reassigned.push((user.id, target));
                }
                None => doomed.push(user),
            }
        }

        for user in doomed {
            if self.deleter.delete_user(user).await? == Disposal::Reclaimed {
                outcome.users_removed += 1;
            }
        }

        outcome.remaining = self.groups.references(group.id).await?;
        if !outcome.remaining.is_clear() {
            return Ok(outcome);
        }

        outcome.reclaimed = match self.groups.delete(group).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => true,
            Err(ConnectorError::StillReferenced { .. }) => {
                // Something was added between the check and the delete
                outcome.remaining = self.groups.references(group.id).await?;
                false
            }
            Err(e) => return Err(e),
        };
        Ok(outcome)
    }

    /// First alternate group of a live user that is itself still active.
    async fn reassignment_target(
        &self,
        user: &User,
        group: GroupId,
    ) -> ConnectorResult<Option<GroupId>> {
        if user.status.is_deleted() {
            return Ok(None);
        }
        for candidate in user.alternate_groups(group) {
            if let Some(alternate) = self.groups.read(candidate).await?
                && !alternate.status.is_deleted()
            {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}
