//! Blob storage contract consumed by the table store.
//!
//! The store treats object storage as an external collaborator with three
//! capabilities:
//! - Conditional writes (write-once via `DoesNotExist`, CAS via `MatchesVersion`)
//! - Whole-object reads
//! - Prefix listing
//!
//! ## Version tokens
//!
//! The version token is an opaque `String` so that GCS generations, S3 `ETag`s
//! and the in-memory counter all fit the same contract. Callers compare tokens
//! for equality only.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if object does not exist.
    DoesNotExist,
    /// Write only if object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
///
/// All backends (memory, cloud object stores) implement this trait.
/// Objects written by the table store are never overwritten: data files,
/// manifests, manifest lists and metadata documents all go through
/// [`StorageBackend::put_once`].
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if precondition not met.
    /// Never returns error for precondition failure - that's a normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// **Ordering**: Results are returned in arbitrary order. Callers requiring
    /// deterministic order should sort the results.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Writes an object that must not already exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::PreconditionFailed` if the path is already occupied.
    /// The existing object is left untouched.
    async fn put_once(&self, path: &str, data: Bytes) -> Result<String> {
        match self.put(path, data, WritePrecondition::DoesNotExist).await? {
            WriteResult::Success { version } => Ok(version),
            WriteResult::PreconditionFailed { .. } => Err(Error::PreconditionFailed {
                message: format!("object already exists: {path}"),
            }),
        }
    }
}

/// In-memory storage backend.
///
/// Thread-safe via `RwLock`. Uses numeric versions internally (stored as
/// strings) to simulate generation-based object stores.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn object_count(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poisoned())?.len())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("test/file.txt", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");

        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let retrieved = backend
            .get("test/file.txt")
            .await
            .expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_once_refuses_overwrite() {
        let backend = MemoryBackend::new();
        backend
            .put_once("data/a.json", Bytes::from("first"))
            .await
            .expect("first write");

        let err = backend
            .put_once("data/a.json", Bytes::from("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));

        // Original content survives.
        let data = backend.get("data/a.json").await.unwrap();
        assert_eq!(data, Bytes::from("first"));
    }

    #[tokio::test]
    async fn test_precondition_matches_version() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("gen.txt", Bytes::from("v1"), WritePrecondition::None)
            .await
            .expect("should succeed");
        let WriteResult::Success {
            version: first_version,
        } = result
        else {
            panic!("expected success");
        };

        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion(first_version.clone()),
            )
            .await
            .expect("should succeed");
        assert!(result.is_success());

        // Stale version loses.
        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v3"),
                WritePrecondition::MatchesVersion(first_version),
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn test_matches_version_on_missing_object_fails() {
        let backend = MemoryBackend::new();
        let result = backend
            .put(
                "nope",
                Bytes::from("x"),
                WritePrecondition::MatchesVersion("1".into()),
            )
            .await
            .unwrap();
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MemoryBackend::new();

        backend
            .put("a/1.txt", Bytes::from("a1"), WritePrecondition::None)
            .await
            .unwrap();
        backend
            .put("a/2.txt", Bytes::from("a2"), WritePrecondition::None)
            .await
            .unwrap();
        backend
            .put("b/1.txt", Bytes::from("b1"), WritePrecondition::None)
            .await
            .unwrap();

        assert_eq!(backend.list("a/").await.unwrap().len(), 2);
        assert_eq!(backend.list("b/").await.unwrap().len(), 1);
        assert_eq!(backend.object_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = MemoryBackend::new();

        backend
            .put("del.txt", Bytes::from("data"), WritePrecondition::None)
            .await
            .unwrap();
        assert!(backend.head("del.txt").await.unwrap().is_some());

        backend.delete("del.txt").await.expect("should succeed");
        backend.delete("del.txt").await.expect("second delete is a no-op");
        assert!(backend.head("del.txt").await.unwrap().is_none());
    }
}
