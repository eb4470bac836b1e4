//! Test utilities for the reclaimers.
//!
//! Recording fakes for the audit and notification seams, an artifact store
//! that always fails, entity fixtures, and a [`Harness`] wiring a full
//! [`ReclamationPipeline`] over a [`MemoryStore`] and in-memory object stores.
//!
//! # Feature Flag
//!
//! Available during tests or with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! reclaimer = { path = "src/reclaimer", features = ["testing"] }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use tokio::sync::Mutex;

use common::config::ReclaimerConfig;
use common::model::{
    CollectionId, CollectionStatus, Company, CompanyId, Contact, ContactId, Document, DocumentId,
    DocumentCollection, EntityStatus, FieldType, Group, GroupId, ProgramTier, SealId,
    SignatureField, Template, TemplateId, User, UserId,
};

use crate::artifacts::{self, ArtifactStore, ObjectStoreArtifacts};
use crate::audit::{AuditChannel, AuditError, AuditSink, AuditSnapshot, DocumentDeleted, Notifier};
use crate::certificates::{CertificateOwner, CertificateStore, ObjectStoreCertificates};
use crate::connector::Connectors;
use crate::metrics::ReclaimMetrics;
use crate::pipeline::{Collaborators, ReclamationPipeline};
use crate::store::MemoryStore;

/// Audit sink keeping every forwarded snapshot.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub snapshots: Mutex<Vec<AuditSnapshot>>,
    fail_next: Mutex<bool>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshots(&self) -> Vec<AuditSnapshot> {
        self.snapshots.lock().await.clone()
    }

    /// Reject the next snapshot as the history service would.
    pub async fn fail_next(&self) {
        *self.fail_next.lock().await = true;
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    fn channel(&self) -> AuditChannel {
        AuditChannel::Queue
    }

    async fn forward(&self, snapshot: &AuditSnapshot) -> Result<(), AuditError> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(AuditError::Rejected {
                status: 503,
                body: "history service unavailable".to_string(),
            });
        }
        self.snapshots.lock().await.push(snapshot.clone());
        Ok(())
    }
}

/// Notifier keeping every event.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<DocumentDeleted>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DocumentDeleted> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn document_deleted(&self, event: &DocumentDeleted) -> anyhow::Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Artifact store whose every operation fails.
#[derive(Debug, Default)]
pub struct FlakyArtifacts;

#[async_trait]
impl ArtifactStore for FlakyArtifacts {
    async fn delete_template_pdf(&self, template: TemplateId) -> anyhow::Result<()> {
        anyhow::bail!("artifact store unavailable deleting template {template}")
    }

    async fn delete_seal_image(&self, contact: ContactId, seal: SealId) -> anyhow::Result<()> {
        anyhow::bail!("artifact store unavailable deleting seal {seal} of contact {contact}")
    }

    async fn delete_collection_artifacts(&self, collection: CollectionId) -> anyhow::Result<usize> {
        anyhow::bail!("artifact store unavailable deleting collection {collection}")
    }

    async fn delete_company_assets(&self, company: CompanyId) -> anyhow::Result<()> {
        anyhow::bail!("artifact store unavailable deleting assets of company {company}")
    }
}

pub fn company(id: i64) -> Company {
    company_with_retention(id, None, None)
}

/// A company overriding the global retention intervals.
pub fn company_with_retention(id: i64, signed: Option<u32>, unsigned: Option<u32>) -> Company {
    Company {
        id: CompanyId(id),
        name: format!("Company {id}"),
        status: EntityStatus::Active,
        signed_retention_days: signed,
        unsigned_retention_days: unsigned,
        groups: vec![],
    }
}

pub fn group(id: i64, company: CompanyId) -> Group {
    Group {
        id: GroupId(id),
        company_id: company,
        name: format!("Group {id}"),
        status: EntityStatus::Active,
        users: vec![],
    }
}

pub fn user(id: i64, group: GroupId, tier: ProgramTier) -> User {
    User {
        id: UserId(id),
        group_id: group,
        email: format!("user{id}@example.com"),
        status: EntityStatus::Active,
        program_tier: tier,
        additional_group_mappings: vec![],
    }
}

pub fn contact(id: i64, group: GroupId) -> Contact {
    Contact {
        id: ContactId(id),
        group_id: group,
        email: format!("contact{id}@example.com"),
        status: EntityStatus::Active,
        seals: vec![],
        signer_references: 0,
    }
}

/// A reusable template with one prefilled text field.
pub fn template(id: i64, group: GroupId) -> Template {
    Template {
        id: TemplateId(id),
        group_id: group,
        name: format!("Template {id}"),
        status: EntityStatus::Active,
        is_one_time: false,
        signature_fields: vec![
            SignatureField {
                name: "tenant_name".to_string(),
                field_type: FieldType::Text,
                value: Some("Jane Roe".to_string()),
            },
            SignatureField {
                name: "tenant_signature".to_string(),
                field_type: FieldType::Signature,
                value: None,
            },
        ],
    }
}

pub fn document(id: i64, template: TemplateId) -> Document {
    Document {
        id: DocumentId(id),
        template_id: template,
    }
}

/// A collection created and signed `signed_ago` before now.
pub fn signed_collection(id: i64, group: GroupId, signed_ago: Duration) -> DocumentCollection {
    let signed_at = Utc::now() - signed_ago;
    DocumentCollection {
        id: CollectionId(id),
        group_id: group,
        user_id: UserId(1),
        name: format!("Lease {id}"),
        status: CollectionStatus::Signed,
        created_at: signed_at - Duration::days(1),
        signed_at: Some(signed_at),
        documents: vec![],
    }
}

pub fn draft_collection(id: i64, group: GroupId, created_ago: Duration) -> DocumentCollection {
    DocumentCollection {
        id: CollectionId(id),
        group_id: group,
        user_id: UserId(1),
        name: format!("Draft {id}"),
        status: CollectionStatus::Draft,
        created_at: Utc::now() - created_ago,
        signed_at: None,
        documents: vec![],
    }
}

/// Configuration the harness builds its pipeline from: default retention,
/// queue audit channel.
pub fn reclaimer_config(company_batch_size: usize) -> ReclaimerConfig {
    let mut config = ReclaimerConfig {
        company_batch_size,
        ..Default::default()
    };
    config.audit.use_queue = true;
    config
}

/// A full pipeline over a [`MemoryStore`] with recording fakes.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    /// Backing store of the artifact collaborator.
    pub files: Arc<dyn ObjectStore>,
    /// Backing store of the certificate collaborator.
    pub certificate_files: Arc<dyn ObjectStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub certificates: Arc<dyn CertificateStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: ReclaimMetrics,
    pub pipeline: ReclamationPipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store_and_batch(Arc::new(MemoryStore::new()), 250)
    }

    pub fn with_store_and_batch(store: Arc<MemoryStore>, company_batch_size: usize) -> Self {
        let files: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let artifacts = Arc::new(ObjectStoreArtifacts::new(files.clone()));
        Self::build(store, files, artifacts, company_batch_size)
    }

    /// Every artifact operation fails; certificates still work.
    pub fn with_failing_artifacts() -> Self {
        let files: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Self::build(
            Arc::new(MemoryStore::new()),
            files,
            Arc::new(FlakyArtifacts),
            250,
        )
    }

    fn build(
        store: Arc<MemoryStore>,
        files: Arc<dyn ObjectStore>,
        artifacts: Arc<dyn ArtifactStore>,
        company_batch_size: usize,
    ) -> Self {
        let certificate_files: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let certificates: Arc<dyn CertificateStore> =
            Arc::new(ObjectStoreCertificates::new(certificate_files.clone()));
        let audit = Arc::new(RecordingAuditSink::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = ReclaimMetrics::new();

        let collaborators = Collaborators {
            artifacts: artifacts.clone(),
            certificates: certificates.clone(),
            audit: audit.clone(),
            notifier: notifier.clone(),
        };
        let pipeline = match ReclamationPipeline::new(
            &reclaimer_config(company_batch_size),
            Connectors::from_store(store.clone()),
            collaborators,
            metrics.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => panic!("default reclaimer configuration is valid: {e:#}"),
        };

        Self {
            store,
            files,
            certificate_files,
            artifacts,
            certificates,
            audit,
            notifier,
            metrics,
            pipeline,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            artifacts: self.artifacts.clone(),
            certificates: self.certificates.clone(),
            audit: self.audit.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Seal images and the signing certificate of a contact.
    pub async fn seed_contact_files(&self, contact: &Contact) {
        for seal in &contact.seals {
            put(&self.files, artifacts::seal_image_path(contact.id, *seal)).await;
        }
        put(
            &self.certificate_files,
            CertificateOwner::Contact(contact.id).path(),
        )
        .await;
    }

    pub async fn seed_user_certificate(&self, user: UserId) {
        put(&self.certificate_files, CertificateOwner::User(user).path()).await;
    }

    pub async fn seed_template_pdf(&self, template: TemplateId) {
        put(&self.files, artifacts::template_pdf_path(template)).await;
    }

    /// One PDF per document of the collection.
    pub async fn seed_collection_files(&self, collection: &DocumentCollection) {
        for document in &collection.documents {
            put(
                &self.files,
                artifacts::document_pdf_path(collection.id, document.id),
            )
            .await;
        }
    }

    pub async fn seed_company_files(&self, company: CompanyId) {
        for path in artifacts::company_asset_paths(company) {
            put(&self.files, path).await;
        }
    }

    pub async fn file_count(&self) -> usize {
        count(&self.files).await
    }

    pub async fn certificate_count(&self) -> usize {
        count(&self.certificate_files).await
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

async fn put(store: &Arc<dyn ObjectStore>, path: ObjectPath) {
    if let Err(e) = store.put(&path, "fixture".into()).await {
        panic!("failed to seed {path}: {e}");
    }
}

async fn count(store: &Arc<dyn ObjectStore>) -> usize {
    match store.list(None).try_collect::<Vec<_>>().await {
        Ok(objects) => objects.len(),
        Err(e) => panic!("failed to list fixtures: {e}"),
    }
}
