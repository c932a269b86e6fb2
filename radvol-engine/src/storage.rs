//! Blob storage collaborator
//!
//! The pipeline only ever asks for bytes by path; which storage product
//! sits behind the path is not its concern. The local filesystem
//! implementation backs single-node deployments and the test suite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use radvol_common::{Error, Result};

/// Byte-level storage access by opaque path
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn download_by_path(&self, path: &str) -> Result<Vec<u8>>;
    async fn upload_by_path(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed storage rooted at a base directory.
///
/// Paths are resolved relative to the root; absolute or parent-escaping
/// paths are rejected.
pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::InvalidInput(format!(
                "Storage path must be relative and contained: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStorage for LocalFsStorage {
    async fn download_by_path(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", path)))
            }
            Err(e) => Err(Error::Storage(format!("Failed to read {}: {}", path, e))),
        }
    }

    async fn upload_by_path(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        storage
            .upload_by_path("uploads/vol.csv", b"Cliente;Paciente\n")
            .await
            .unwrap();
        let bytes = storage.download_by_path("uploads/vol.csv").await.unwrap();
        assert_eq!(bytes, b"Cliente;Paciente\n");
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        let err = storage.download_by_path("nope.csv").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path());

        assert!(storage.download_by_path("../etc/passwd").await.is_err());
        assert!(storage.download_by_path("/etc/passwd").await.is_err());
    }
}
