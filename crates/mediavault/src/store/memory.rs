//! In-memory artifact store for tests.
//!
//! Supports per-path failure injection so executor cleanup paths can be
//! exercised without a real object store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_path, ArtifactStore};
use crate::error::StorageError;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
    /// Substrings; a `put` whose path contains any of them fails.
    fail_put_patterns: Mutex<Vec<String>>,
    /// Substrings; a `remove` whose path contains any of them fails.
    fail_remove_patterns: Mutex<Vec<String>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` whose path contains `pattern` fail.
    pub fn fail_puts_matching(&self, pattern: &str) {
        self.fail_put_patterns
            .lock()
            .expect("pattern lock")
            .push(pattern.to_string());
    }

    /// Makes every subsequent `remove` whose path contains `pattern` fail.
    pub fn fail_removes_matching(&self, pattern: &str) {
        self.fail_remove_patterns
            .lock()
            .expect("pattern lock")
            .push(pattern.to_string());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.lock().expect("blob lock").contains_key(path)
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().expect("blob lock").len()
    }

    pub fn blob_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob lock")
            .get(path)
            .map(|b| b.bytes.clone())
    }

    pub fn blob_content_type(&self, path: &str) -> Option<String> {
        self.blobs
            .lock()
            .expect("blob lock")
            .get(path)
            .map(|b| b.content_type.clone())
    }

    fn matches(patterns: &Mutex<Vec<String>>, path: &str) -> bool {
        patterns
            .lock()
            .expect("pattern lock")
            .iter()
            .any(|p| path.contains(p.as_str()))
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_path(path)?;

        if Self::matches(&self.fail_put_patterns, path) {
            return Err(StorageError::WriteBlob {
                path: path.to_string(),
                reason: "injected put failure".to_string(),
            });
        }

        self.blobs.lock().expect("blob lock").insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut failed = Vec::new();
        let mut blobs = self.blobs.lock().expect("blob lock");

        for path in paths {
            if Self::matches(&self.fail_remove_patterns, path) {
                failed.push(path.clone());
                continue;
            }
            blobs.remove(path);
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::RemoveBlobs { failed })
        }
    }

    async fn read_url(&self, path: &str, _ttl: Duration) -> Result<String, StorageError> {
        if self.contains(path) {
            Ok(format!("memory://{}", path))
        } else {
            Err(StorageError::NotFound {
                path: path.to_string(),
            })
        }
    }
}
