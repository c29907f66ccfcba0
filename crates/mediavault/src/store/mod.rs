//! Artifact store client: named byte blobs in an external object store.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

pub mod filesystem;
pub mod memory;

pub use filesystem::FsArtifactStore;
pub use memory::MemoryArtifactStore;

/// Builds the blob path for an original artifact: `{owner}/{name}`.
pub fn artifact_path(owner_id: &str, name: &str) -> String {
    format!("{}/{}", owner_id, name)
}

/// Builds the blob path for a thumbnail: `{owner}/thumbnails/{name}`.
pub fn thumbnail_path(owner_id: &str, name: &str) -> String {
    format!("{}/thumbnails/{}", owner_id, name)
}

/// Write/remove/read-url operations against the external object store.
///
/// Implementations must treat `remove` as best-effort per path: a returned
/// [`StorageError::RemoveBlobs`] carries only the paths that could not be
/// removed, and any others are gone.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str)
        -> Result<(), StorageError>;

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;

    /// Mints a retrievable URL for the blob, valid for at least `ttl`.
    async fn read_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Rejects empty paths and any path that escapes its namespace.
pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && path.split('/').all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_namespacing() {
        assert_eq!(artifact_path("owner-1", "a.jpg"), "owner-1/a.jpg");
        assert_eq!(
            thumbnail_path("owner-1", "a.jpg"),
            "owner-1/thumbnails/a.jpg"
        );
    }

    #[test]
    fn test_validate_path_accepts_namespaced() {
        assert!(validate_path("owner/abc.jpg").is_ok());
        assert!(validate_path("owner/thumbnails/abc.jpg").is_ok());
    }

    #[test]
    fn test_validate_path_rejects_escapes() {
        assert!(validate_path("").is_err());
        assert!(validate_path("/etc/passwd").is_err());
        assert!(validate_path("owner/../other/abc.jpg").is_err());
        assert!(validate_path("owner//abc.jpg").is_err());
        assert!(validate_path("owner/./abc.jpg").is_err());
    }
}
