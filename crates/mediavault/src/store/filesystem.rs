//! Filesystem-backed artifact store.
//!
//! Blobs live under a single root directory, addressed by their namespaced
//! path. Read URLs are `file://` URLs; the requested TTL is accepted but has
//! no meaning for local files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_path, ArtifactStore};
use crate::error::StorageError;

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let full = self.resolve(path)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteBlob {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }

        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| StorageError::WriteBlob {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut failed = Vec::new();

        for path in paths {
            let full = match self.resolve(path) {
                Ok(full) => full,
                Err(_) => {
                    failed.push(path.clone());
                    continue;
                }
            };
            match tokio::fs::remove_file(&full).await {
                Ok(()) => {}
                // Already gone counts as removed.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(_) => failed.push(path.clone()),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::RemoveBlobs { failed })
        }
    }

    async fn read_url(&self, path: &str, _ttl: Duration) -> Result<String, StorageError> {
        let full = self.resolve(path)?;
        tokio::fs::metadata(&full)
            .await
            .map_err(|_| StorageError::NotFound {
                path: path.to_string(),
            })?;
        Ok(format!("file://{}", full.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_read_url() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store
            .put("owner/a.jpg", b"jpeg bytes", "image/jpeg")
            .await
            .unwrap();

        assert!(dir.path().join("owner/a.jpg").exists());

        let url = store
            .read_url("owner/a.jpg", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("owner/a.jpg"));
    }

    #[tokio::test]
    async fn test_put_creates_thumbnail_namespace() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store
            .put("owner/thumbnails/a.jpg", b"thumb", "image/jpeg")
            .await
            .unwrap();

        assert!(dir.path().join("owner/thumbnails/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_remove_is_best_effort() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.put("owner/a.jpg", b"x", "image/jpeg").await.unwrap();

        // One existing, one missing: missing blobs count as already removed.
        store
            .remove(&["owner/a.jpg".to_string(), "owner/gone.jpg".to_string()])
            .await
            .unwrap();
        assert!(!dir.path().join("owner/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_read_url_missing_blob() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let result = store.read_url("owner/none.jpg", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_put_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let result = store.put("../outside.jpg", b"x", "image/jpeg").await;
        assert!(matches!(result, Err(StorageError::InvalidPath { .. })));
    }
}
