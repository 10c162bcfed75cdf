//! Object storage for PDF artifacts.
//!
//! Keys are deterministic per RFP (`pdfs/{rfp_id}/{filename}`), so re-upload
//! of an existing key is a no-op and concurrent workers cannot collide.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object io error: {0}")]
    Io(#[from] io::Error),
    #[error("object not found: {key}")]
    NotFound { key: String },
    #[error("invalid object key: {key}")]
    InvalidKey { key: String },
}

/// Storage contract for artifacts. The filesystem backend below is the
/// default; the key layout is the interface, not the backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn upload(&self, key: &str, bytes: &[u8], mime: &str) -> Result<(), ObjectStoreError>;
    async fn download(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

/// Filesystem-backed object store rooted at `root/bucket`. Writes go through
/// a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str) -> Self {
        FsObjectStore {
            root: root.into().join(bucket),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        // Keys are slash-separated relative paths; reject traversal.
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(ObjectStoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn upload(&self, key: &str, bytes: &[u8], _mime: &str) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key)?;
        if fs::try_exists(&path).await? {
            return Ok(());
        }

        let parent = path
            .parent()
            .ok_or_else(|| ObjectStoreError::InvalidKey {
                key: key.to_string(),
            })?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err.into())
            }
        }
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "rfp-documents");

        store
            .upload("pdfs/1/doc.pdf", b"%PDF-1.4 test", "application/pdf")
            .await
            .expect("upload");
        assert!(store.exists("pdfs/1/doc.pdf").await.unwrap());
        let bytes = store.download("pdfs/1/doc.pdf").await.expect("download");
        assert_eq!(bytes, b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn re_upload_same_key_is_noop() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "rfp-documents");

        store
            .upload("pdfs/2/doc.pdf", b"original", "application/pdf")
            .await
            .expect("first upload");
        store
            .upload("pdfs/2/doc.pdf", b"replacement", "application/pdf")
            .await
            .expect("second upload");

        let bytes = store.download("pdfs/2/doc.pdf").await.expect("download");
        assert_eq!(bytes, b"original");
    }

    #[tokio::test]
    async fn missing_key_is_typed_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "rfp-documents");

        assert!(!store.exists("pdfs/9/missing.pdf").await.unwrap());
        let err = store.download("pdfs/9/missing.pdf").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "rfp-documents");

        store
            .upload("pdfs/3/doc.pdf", b"x", "application/pdf")
            .await
            .expect("upload");
        store.delete("pdfs/3/doc.pdf").await.expect("delete");
        store.delete("pdfs/3/doc.pdf").await.expect("second delete");
        assert!(!store.exists("pdfs/3/doc.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = FsObjectStore::new(dir.path(), "rfp-documents");

        for key in ["", "../escape.pdf", "pdfs//doc.pdf", "pdfs/../../x"] {
            let err = store.upload(key, b"x", "application/pdf").await.unwrap_err();
            assert!(matches!(err, ObjectStoreError::InvalidKey { .. }), "{key}");
        }
    }
}
