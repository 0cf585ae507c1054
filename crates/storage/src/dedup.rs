//! Deduplication index: digest → stored-object relative path.
//!
//! The default implementation is a single JSON file inside the storage
//! root, loaded on demand and fully rewritten on each register. The
//! contract is deliberately small so a real KV store can replace it
//! without touching the session manager. The critical property is that a
//! lookup is only authoritative after re-checking that the referenced
//! object still exists.

use crate::error::{StorageError, StorageResult};
use crate::object::{DEDUP_INDEX_FILENAME, MediaStore};
use async_trait::async_trait;
use hopper_core::Md5Digest;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Digest-keyed map from content digest to stored-object relative path.
#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// Resolve a digest to a stored path, if the object still exists.
    ///
    /// A stale entry (one whose object was swept) resolves to `None`;
    /// staleness is not an error.
    async fn lookup(&self, digest: &Md5Digest) -> StorageResult<Option<String>>;

    /// Upsert an entry.
    async fn register(&self, digest: &Md5Digest, relative_path: &str) -> StorageResult<()>;
}

/// Single-JSON-file dedup index (`md5_index.json` under the storage root).
pub struct JsonDedupIndex {
    path: PathBuf,
    objects: Arc<MediaStore>,
    /// Serialises writers; readers may observe an older snapshot.
    write_lock: Mutex<()>,
}

impl JsonDedupIndex {
    /// Create an index stored alongside the given object store.
    pub fn new(objects: Arc<MediaStore>) -> Self {
        Self {
            path: objects.root().join(DEDUP_INDEX_FILENAME),
            objects,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::IndexCorrupt(e.to_string()))
    }

    async fn persist(&self, map: &BTreeMap<String, String>) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|e| StorageError::IndexCorrupt(e.to_string()))?;
        let temp_path = self.path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DedupIndex for JsonDedupIndex {
    #[instrument(skip(self), fields(digest = %digest))]
    async fn lookup(&self, digest: &Md5Digest) -> StorageResult<Option<String>> {
        let map = self.load().await?;
        let Some(relative) = map.get(&digest.to_hex()) else {
            return Ok(None);
        };
        // An entry is authoritative only while its object exists; a dangling
        // entry is treated as absent, not as an error.
        if self.objects.exists(relative).await? {
            Ok(Some(relative.clone()))
        } else {
            tracing::debug!(path = %relative, "dedup entry is stale, ignoring");
            Ok(None)
        }
    }

    #[instrument(skip(self), fields(digest = %digest, path = %relative_path))]
    async fn register(&self, digest: &Md5Digest, relative_path: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(digest.to_hex(), relative_path.to_string());
        self.persist(&map).await
    }
}
