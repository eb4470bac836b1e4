//! Signing certificates keyed by their owner.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::path::Path as ObjectPath;

use common::model::{ContactId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CertificateOwner {
    Contact(ContactId),
    User(UserId),
}

impl CertificateOwner {
    pub fn path(&self) -> ObjectPath {
        match self {
            CertificateOwner::Contact(id) => {
                ObjectPath::from(format!("certificates/contacts/{id}.p12"))
            }
            CertificateOwner::User(id) => ObjectPath::from(format!("certificates/users/{id}.p12")),
        }
    }
}

impl fmt::Display for CertificateOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateOwner::Contact(id) => write!(f, "contact {id}"),
            CertificateOwner::User(id) => write!(f, "user {id}"),
        }
    }
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Revoke the owner's certificate. Returns `false` when none existed.
    async fn revoke(&self, owner: CertificateOwner) -> Result<bool>;
}

pub struct ObjectStoreCertificates {
    object_store: Arc<dyn ObjectStore>,
}

impl ObjectStoreCertificates {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self { object_store }
    }
}

#[async_trait]
impl CertificateStore for ObjectStoreCertificates {
    async fn revoke(&self, owner: CertificateOwner) -> Result<bool> {
        let path = owner.path();
        match self.object_store.head(&path).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to look up certificate of {owner}"));
            }
        }

        match self.object_store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(owner = %owner, "Revoked signing certificate");
                Ok(true)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to revoke certificate of {owner}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_paths() {
        assert_eq!(
            CertificateOwner::Contact(ContactId(3)).path().as_ref(),
            "certificates/contacts/3.p12"
        );
        assert_eq!(
            CertificateOwner::User(UserId(4)).path().as_ref(),
            "certificates/users/4.p12"
        );
    }

    #[tokio::test]
    async fn test_revoke() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let owner = CertificateOwner::User(UserId(9));
        store.put(&owner.path(), "p12".into()).await.unwrap();

        let certificates = ObjectStoreCertificates::new(store.clone());
        assert!(certificates.revoke(owner).await.unwrap());
        assert!(store.head(&owner.path()).await.is_err());

        // A second revocation finds nothing
        assert!(!certificates.revoke(owner).await.unwrap());
    }
}
