//! Test storage with operation tracing and failure injection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use strata_core::error::{Error, Result};
use strata_core::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Returns the operation name.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Head { .. } => "head",
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
        }
    }

    /// Returns the path or prefix the operation touched.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::List { prefix: path } => path,
        }
    }
}

/// In-memory storage backend that records every operation.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl TracingMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that sleeps before every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails every operation on paths starting with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Returns the stored bytes at `path`.
    #[must_use]
    pub fn bytes(&self, path: &str) -> Option<Bytes> {
        self.data
            .lock()
            .expect("lock")
            .get(path)
            .map(|o| o.data.clone())
    }

    /// Returns the current version of `path`.
    #[must_use]
    pub fn version(&self, path: &str) -> Option<String> {
        self.data
            .lock()
            .expect("lock")
            .get(path)
            .map(|o| o.version.to_string())
    }

    /// Returns every stored path, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.data.lock().expect("lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns stored paths starting with `prefix`, sorted.
    #[must_use]
    pub fn paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.paths()
            .into_iter()
            .filter(|p| p.starts_with(prefix))
            .collect()
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::Internal {
                message: format!("injected failure for path: {path}"),
            });
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| ObjectMeta {
            path: path.to_string(),
            size: o.data.len() as u64,
            version: o.version.to_string(),
            last_modified: Some(o.last_modified),
        }))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
            precondition: precondition.clone(),
        });

        let mut store = self.data.lock().expect("lock");
        let existing = store.get(path);

        match &precondition {
            WritePrecondition::None => {}
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = existing {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match existing {
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
        }

        let new_version = existing.map_or(1, |o| o.version + 1);
        store.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });

        self.data.lock().expect("lock").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                path: k.clone(),
                size: v.data.len() as u64,
                version: v.version.to_string(),
                last_modified: Some(v.last_modified),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_storage_records_operations() {
        let storage = TracingMemoryBackend::new();

        storage
            .put("test.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");
        let _ = storage.get("test.json").await;
        let _ = storage.list("").await;

        let ops = storage.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], StorageOp::Put { .. }));
        assert_eq!(ops[1].kind(), "get");
        assert_eq!(ops[2].path(), "");
    }

    #[tokio::test]
    async fn tracing_storage_failure_injection() {
        let storage = TracingMemoryBackend::new();
        storage.inject_failure("warehouse/raw/");

        let result = storage
            .put("warehouse/raw/t/data/x.rows.json", Bytes::from("[]"), WritePrecondition::None)
            .await;
        assert!(result.is_err());

        storage
            .put("warehouse/silver/t.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");
        assert!(storage.get("warehouse/silver/t.json").await.is_ok());

        storage.clear_failures();
        assert!(storage.list("warehouse/raw/").await.is_ok());
    }

    #[tokio::test]
    async fn tracing_storage_put_once_refuses_overwrite() {
        let storage = TracingMemoryBackend::new();
        storage.put_once("a.json", Bytes::from("1")).await.expect("first");
        let second = storage.put_once("a.json", Bytes::from("2")).await;
        assert!(matches!(second, Err(Error::PreconditionFailed { .. })));
        assert_eq!(storage.bytes("a.json"), Some(Bytes::from("1")));
        assert_eq!(storage.version("a.json").as_deref(), Some("1"));
    }
}
