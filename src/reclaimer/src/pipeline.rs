//! Reclamation pipeline
//!
//! Wires every reclaimer from one set of connectors and collaborators and
//! runs them leaf-first, following [`EntityKind::reclaim_order`].
//!
//! ## Isolation
//!
//! A reclaimer whose run fails outright (a listing query errors, a batch
//! delete is refused) is logged and recorded in the [`PipelineReport`]; the
//! remaining reclaimers still run. Deletions that completed before the
//! failure stay committed.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use common::config::ReclaimerConfig;

use crate::artifacts::ArtifactStore;
use crate::audit::{AuditSink, Notifier};
use crate::certificates::CertificateStore;
use crate::connector::Connectors;
use crate::dependency::EntityKind;
use crate::metrics::ReclaimMetrics;
use crate::reclaim::{
    CompanyReclaimer, ContactReclaimer, DocumentCollectionReclaimer, GroupReclaimer,
    ReclaimReport, TemplateReclaimer, UserDeleter, UserReclaimer,
};
use crate::retention::RetentionPolicyResolver;

/// Non-database services the reclaimers hand work to.
#[derive(Clone)]
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub certificates: Arc<dyn CertificateStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
}

/// A reclaimer run that failed as a whole.
#[derive(Debug, Clone)]
pub struct StageError {
    pub kind: EntityKind,
    pub error: String,
}

/// Result of one pass over every reclaimer.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub reports: Vec<ReclaimReport>,
    pub errors: Vec<StageError>,
}

impl PipelineReport {
    pub fn report(&self, kind: EntityKind) -> Option<&ReclaimReport> {
        self.reports.iter().find(|r| r.kind == kind)
    }

    pub fn total_reclaimed(&self) -> usize {
        self.reports.iter().map(|r| r.reclaimed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed()).sum::<usize>() + self.errors.len()
    }
}

pub struct ReclamationPipeline {
    collections: Arc<DocumentCollectionReclaimer>,
    templates: Arc<TemplateReclaimer>,
    contacts: Arc<ContactReclaimer>,
    users: Arc<UserReclaimer>,
    groups: Arc<GroupReclaimer>,
    companies: Arc<CompanyReclaimer>,
    metrics: ReclaimMetrics,
}

impl ReclamationPipeline {
    pub fn new(
        config: &ReclaimerConfig,
        connectors: Connectors,
        collaborators: Collaborators,
        metrics: ReclaimMetrics,
    ) -> anyhow::Result<Self> {
        let resolver = RetentionPolicyResolver::new(config.retention.clone())
            .context("Failed to create retention policy resolver")?;

        let deleter = Arc::new(UserDeleter::new(
            connectors.users.clone(),
            collaborators.certificates.clone(),
            metrics.clone(),
        ));
        let contacts = Arc::new(ContactReclaimer::new(
            connectors.contacts.clone(),
            collaborators.artifacts.clone(),
            collaborators.certificates.clone(),
            metrics.clone(),
        ));
        let templates = Arc::new(TemplateReclaimer::new(
            connectors.templates.clone(),
            collaborators.artifacts.clone(),
            metrics.clone(),
        ));
        let collections = Arc::new(DocumentCollectionReclaimer::new(
            connectors.companies.clone(),
            connectors.groups.clone(),
            connectors.templates.clone(),
            connectors.collections.clone(),
            collaborators.artifacts.clone(),
            collaborators.audit.clone(),
            collaborators.notifier.clone(),
            resolver,
            config.company_batch_size,
            metrics.clone(),
        ));
        let groups = Arc::new(GroupReclaimer::new(
            connectors.groups.clone(),
            connectors.users.clone(),
            contacts.clone(),
            templates.clone(),
            collections.clone(),
            deleter.clone(),
            metrics.clone(),
        ));
        let users = Arc::new(UserReclaimer::new(
            connectors.users.clone(),
            connectors.groups.clone(),
            deleter,
            groups.clone(),
            metrics.clone(),
        ));
        let companies = Arc::new(CompanyReclaimer::new(
            connectors.companies,
            connectors.groups,
            groups.clone(),
            collaborators.artifacts,
            metrics.clone(),
        ));

        info!(
            audit_channel = ?collaborators.audit.channel(),
            company_batch_size = config.company_batch_size,
            "Reclamation pipeline initialized"
        );

        Ok(Self {
            collections,
            templates,
            contacts,
            users,
            groups,
            companies,
            metrics,
        })
    }

    /// Run every reclaimer once, leaf kinds first.
    pub async fn run_once(&self) -> PipelineReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(run_id = %run_id, "Starting reclamation run");

        let mut reports = Vec::new();
        let mut errors = Vec::new();

        for kind in EntityKind::reclaim_order() {
            match self.run_stage(kind).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(run_id = %run_id, kind = %kind, error = %format!("{e:#}"), "Reclaimer run failed");
                    errors.push(StageError {
                        kind,
                        error: format!("{e:#}"),
                    });
                }
            }
        }

        let report = PipelineReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            reports,
            errors,
        };

        info!(
            run_id = %report.run_id,
            reclaimed = report.total_reclaimed(),
            failed = report.total_failed(),
            duration_ms = (report.completed_at - report.started_at).num_milliseconds(),
            "Reclamation run complete"
        );
        report
    }

    async fn run_stage(&self, kind: EntityKind) -> anyhow::Result<ReclaimReport> {
        match kind {
            EntityKind::DocumentCollection => self.collections.run().await,
            EntityKind::Template => self.templates.run().await,
            EntityKind::Contact => self.contacts.run().await,
            EntityKind::User => self.users.run().await,
            EntityKind::Group => self.groups.run().await,
            EntityKind::Company => self.companies.run().await,
        }
    }

    pub fn collections(&self) -> &DocumentCollectionReclaimer {
        &self.collections
    }

    pub fn templates(&self) -> &TemplateReclaimer {
        &self.templates
    }

    pub fn contacts(&self) -> &ContactReclaimer {
        &self.contacts
    }

    pub fn users(&self) -> &UserReclaimer {
        &self.users
    }

    pub fn groups(&self) -> &GroupReclaimer {
        &self.groups
    }

    pub fn companies(&self) -> &CompanyReclaimer {
        &self.companies
    }

    pub fn metrics(&self) -> &ReclaimMetrics {
        &self.metrics
    }
}
