//! Entity-owned files in object storage.
//!
//! Layout:
//! - `templates/{template}.pdf`
//! - `seals/{contact}/{seal}.png`
//! - `collections/{collection}/…` (appendices, attachments, per-document PDFs)
//! - `companies/{company}/logo.png` and `companies/{company}/branding-email.html`
//!
//! A missing object counts as deleted so retried cleanups succeed.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;

use common::model::{CollectionId, CompanyId, ContactId, DocumentId, SealId, TemplateId};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn delete_template_pdf(&self, template: TemplateId) -> Result<()>;

    async fn delete_seal_image(&self, contact: ContactId, seal: SealId) -> Result<()>;

    /// Remove every file under the collection; returns how many were removed.
    async fn delete_collection_artifacts(&self, collection: CollectionId) -> Result<usize>;

    /// Remove the company logo and branding email.
    async fn delete_company_assets(&self, company: CompanyId) -> Result<()>;
}

pub fn template_pdf_path(template: TemplateId) -> ObjectPath {
    ObjectPath::from(format!("templates/{template}.pdf"))
}

pub fn seal_image_path(contact: ContactId, seal: SealId) -> ObjectPath {
    ObjectPath::from(format!("seals/{contact}/{seal}.png"))
}

pub fn collection_prefix(collection: CollectionId) -> ObjectPath {
    ObjectPath::from(format!("collections/{collection}"))
}

pub fn document_pdf_path(collection: CollectionId, document: DocumentId) -> ObjectPath {
    ObjectPath::from(format!("collections/{collection}/documents/{document}.pdf"))
}

pub fn company_asset_paths(company: CompanyId) -> [ObjectPath; 2] {
    [
        ObjectPath::from(format!("companies/{company}/logo.png")),
        ObjectPath::from(format!("companies/{company}/branding-email.html")),
    ]
}

/// [`ArtifactStore`] over any `object_store` backend.
pub struct ObjectStoreArtifacts {
    object_store: Arc<dyn ObjectStore>,
}

impl ObjectStoreArtifacts {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }

    async fn delete_file(&self, path: &ObjectPath) -> Result<()> {
        match self.object_store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete file: {path}")),
        }
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreArtifacts {
    async fn delete_template_pdf(&self, template: TemplateId) -> Result<()> {
        self.delete_file(&template_pdf_path(template)).await
    }

    async fn delete_seal_image(&self, contact: ContactId, seal: SealId) -> Result<()> {
        self.delete_file(&seal_image_path(contact, seal)).await
    }

    async fn delete_collection_artifacts(&self, collection: CollectionId) -> Result<usize> {
        let prefix = collection_prefix(collection);
        let objects: Vec<_> = self
            .object_store
            .list(Some(&prefix))
            .try_collect()
            .await
            .with_context(|| format!("Failed to list files under {prefix}"))?;

        for meta in &objects {
            self.delete_file(&meta.location).await?;
        }

        tracing::debug!(
            collection_id = %collection,
            files = objects.len(),
            "Deleted collection artifacts"
        );
        Ok(objects.len())
    }

    async fn delete_company_assets(&self, company: CompanyId) -> Result<()> {
        for path in company_asset_paths(company) {
            self.delete_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    async fn put(store: &Arc<dyn ObjectStore>, path: ObjectPath) {
        store.put(&path, "bytes".into()).await.unwrap();
    }

    async fn exists(store: &Arc<dyn ObjectStore>, path: &ObjectPath) -> bool {
        store.head(path).await.is_ok()
    }

    #[tokio::test]
    async fn test_collection_artifacts_removed_by_prefix() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        put(&store, document_pdf_path(CollectionId(1), DocumentId(10))).await;
        put(&store, ObjectPath::from("collections/1/appendices/terms.pdf")).await;
        put(&store, ObjectPath::from("collections/1/attachments/id.png")).await;
        put(&store, document_pdf_path(CollectionId(12), DocumentId(11))).await;

        let artifacts = ObjectStoreArtifacts::new(store.clone());
        let removed = artifacts
            .delete_collection_artifacts(CollectionId(1))
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert!(!exists(&store, &document_pdf_path(CollectionId(1), DocumentId(10))).await);
        // Prefix matching is by path segment, so collection 12 is untouched
        assert!(exists(&store, &document_pdf_path(CollectionId(12), DocumentId(11))).await);
    }

    #[tokio::test]
    async fn test_missing_files_count_as_deleted() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let artifacts = ObjectStoreArtifacts::new(store);

        artifacts.delete_template_pdf(TemplateId(3)).await.unwrap();
        artifacts
            .delete_seal_image(ContactId(1), SealId(2))
            .await
            .unwrap();
        artifacts.delete_company_assets(CompanyId(4)).await.unwrap();
        assert_eq!(
            artifacts
                .delete_collection_artifacts(CollectionId(5))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_local_filesystem_missing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(
            object_store::local::LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap(),
        );
        put(&store, template_pdf_path(TemplateId(8))).await;

        let artifacts = ObjectStoreArtifacts::new(store.clone());
        artifacts.delete_template_pdf(TemplateId(8)).await.unwrap();
        artifacts.delete_template_pdf(TemplateId(8)).await.unwrap();

        assert!(!exists(&store, &template_pdf_path(TemplateId(8))).await);
    }

    #[tokio::test]
    async fn test_company_assets() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        for path in company_asset_paths(CompanyId(2)) {
            put(&store, path).await;
        }

        let artifacts = ObjectStoreArtifacts::new(store.clone());
        artifacts.delete_company_assets(CompanyId(2)).await.unwrap();

        for path in company_asset_paths(CompanyId(2)) {
            assert!(!exists(&store, &path).await);
        }
    }
}
