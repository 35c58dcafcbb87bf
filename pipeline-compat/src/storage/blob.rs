//! Pipeline blob storage.
//!
//! Large pipeline values are written as JSON objects into the default
//! bucket and referenced by name.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::BucketName;
use crate::errors::{Result, StorageError};

/// Top-level prefix for every pipeline blob.
pub const BLOB_PREFIX: &str = "appengine_pipeline";

/// Builds a fresh blob name.
///
/// `appengine_pipeline/{pipeline_id}/{hex}` or `appengine_pipeline/{hex}`,
/// always `/`-separated.
#[must_use]
pub fn blob_name(pipeline_id: Option<&str>) -> String {
    let id = Uuid::new_v4().simple();
    match pipeline_id.filter(|p| !p.is_empty()) {
        Some(pipeline_id) => format!("{BLOB_PREFIX}/{pipeline_id}/{id}"),
        None => format!("{BLOB_PREFIX}/{id}"),
    }
}

/// Reads and writes pipeline blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a JSON-encoded value and returns its blob name.
    async fn write_json(&self, encoded: &str, pipeline_id: Option<&str>) -> Result<String>;

    /// Reads a blob's bytes.
    async fn read_blob(&self, name: &str) -> Result<Vec<u8>>;
}

/// Blob store held in memory.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    bucket: BucketName,
    blobs: DashMap<String, Vec<u8>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new(BucketName::new("test-bucket"))
    }
}

impl InMemoryBlobStore {
    /// Creates an empty store reporting `bucket` in errors.
    #[must_use]
    pub fn new(bucket: BucketName) -> Self {
        Self {
            bucket,
            blobs: DashMap::new(),
        }
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// True if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Names of all stored blobs, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Removes every blob.
    pub fn clear(&self) {
        self.blobs.clear();
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn write_json(&self, encoded: &str, pipeline_id: Option<&str>) -> Result<String> {
        let name = blob_name(pipeline_id);
        self.blobs.insert(name.clone(), encoded.as_bytes().to_vec());
        Ok(name)
    }

    async fn read_blob(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .get(name)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| {
                StorageError::NotFound {
                    bucket: self.bucket.to_string(),
                    name: name.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompatError;

    #[test]
    fn test_blob_name_layout() {
        let name = blob_name(Some("pipe-1"));
        let parts: Vec<&str> = name.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "appengine_pipeline");
        assert_eq!(parts[1], "pipe-1");
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));

        let name = blob_name(None);
        assert_eq!(name.split('/').count(), 2);
        assert_ne!(blob_name(None), blob_name(None));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = InMemoryBlobStore::default();
        let name = store.write_json(r#"{"a":1}"#, Some("p")).await.unwrap();

        assert_eq!(store.read_blob(&name).await.unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(store.names(), vec![name]);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = InMemoryBlobStore::default();
        let err = store.read_blob("appengine_pipeline/nope").await.unwrap_err();
        assert!(matches!(err, CompatError::Storage(StorageError::NotFound { .. })));
        assert!(!err.is_retryable());
    }
}
