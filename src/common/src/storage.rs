use anyhow::{Context, Result};
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

/// Extract the filesystem path from a `file://` DSN.
///
/// `file:///.data/files` is relative to the working directory,
/// `file:///srv/files` is absolute.
///
/// # Examples
/// ```
/// use common::storage::file_dsn_path;
/// use url::Url;
///
/// assert_eq!(file_dsn_path(&Url::parse("file:///.data/files").unwrap()).unwrap(), ".data/files");
/// assert_eq!(file_dsn_path(&Url::parse("file:///srv/files").unwrap()).unwrap(), "/srv/files");
/// ```
pub fn file_dsn_path(url: &Url) -> Result<String> {
    let path = url.path();
    if path.is_empty() || path == "/" {
        anyhow::bail!("File DSN must specify a path: file:///path/to/storage");
    }
    Ok(path.strip_prefix("/.").map_or_else(|| path.to_string(), |rest| format!(".{rest}")))
}

/// Create an object store from a DSN string.
///
/// Supported schemes: `file` (directory is created when missing), `memory`,
/// and `s3` (credentials and region from the standard AWS environment).
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = file_dsn_path(&url)?;
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create storage directory {path}"))?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(&path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let store = AmazonS3Builder::from_env()
                .with_url(dsn)
                .build()
                .with_context(|| format!("Failed to configure S3 store for {dsn}"))?;
            Ok(Arc::new(store))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path as ObjectPath;

    #[tokio::test]
    async fn test_filesystem_store_creates_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("nested/files");
        let dsn = format!("file://{}", root.display());

        let store = create_object_store_from_dsn(&dsn).unwrap();
        store
            .put(&ObjectPath::from("a.txt"), "hello".into())
            .await
            .unwrap();

        assert!(root.join("a.txt").exists());
    }

    #[test]
    fn test_memory_store() {
        assert!(create_object_store_from_dsn("memory://").is_ok());
    }

    #[test]
    fn test_invalid_dsn() {
        let err = create_object_store_from_dsn("not-a-url").err().unwrap();
        assert!(err.to_string().contains("Invalid storage DSN"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = create_object_store_from_dsn("gcs://bucket/prefix").err().unwrap();
        assert!(err.to_string().contains("Unsupported storage scheme"));
    }

    #[test]
    fn test_file_dsn_without_path() {
        let err = file_dsn_path(&Url::parse("file://").unwrap()).unwrap_err();
        assert!(err.to_string().contains("File DSN must specify a path"));
    }
}
