//! Chunk staging area.
//!
//! Chunks for session `S` live under `staging_root/upload_{S}`; each chunk
//! is stored as `chunk_{index}.bin`. The filename is the sole carrier of
//! the index. Staged chunks survive process restart and are reclaimed by
//! finalisation, cancellation, or the expiry sweep.

use crate::error::{StorageError, StorageResult};
use crate::STREAM_BUF_SIZE;
use hopper_core::SessionId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

const CHUNK_PREFIX: &str = "chunk_";
const CHUNK_SUFFIX: &str = ".bin";
const SESSION_DIR_PREFIX: &str = "upload_";

/// Filesystem staging area for in-flight upload chunks.
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Create a new staging area rooted at the given directory.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The staging root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a session's staged chunks.
    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(format!("{SESSION_DIR_PREFIX}{session}"))
    }

    fn chunk_path(&self, session: &SessionId, index: u64) -> PathBuf {
        self.session_dir(session)
            .join(format!("{CHUNK_PREFIX}{index}{CHUNK_SUFFIX}"))
    }

    /// Stage a chunk atomically (temp file then rename).
    ///
    /// Re-staging an existing index atomically replaces the file with
    /// identical content, so callers racing on the same index cannot
    /// observe a torn chunk.
    #[instrument(skip(self, data), fields(session = %session, size = data.len()))]
    pub async fn stage_chunk(
        &self,
        session: &SessionId,
        index: u64,
        data: &[u8],
    ) -> StorageResult<()> {
        let path = self.chunk_path(session, index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_file_name(format!(".tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            // Flush to disk before the rename makes the chunk visible.
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Check whether a chunk is staged.
    pub async fn has_chunk(&self, session: &SessionId, index: u64) -> StorageResult<bool> {
        Ok(fs::try_exists(self.chunk_path(session, index)).await?)
    }

    /// Enumerate the staged chunk indices for a session.
    ///
    /// Tolerant of a missing staging directory (returns the empty set).
    #[instrument(skip(self), fields(session = %session))]
    pub async fn enumerate_chunks(&self, session: &SessionId) -> StorageResult<BTreeSet<u64>> {
        let dir = self.session_dir(session);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(index) = name
                .strip_prefix(CHUNK_PREFIX)
                .and_then(|rest| rest.strip_suffix(CHUNK_SUFFIX))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                indices.insert(index);
            }
        }
        Ok(indices)
    }

    /// Stream chunks `0..total_chunks` in order into `output`.
    ///
    /// Fails with [`StorageError::MissingChunk`] if any chunk is absent and
    /// removes the partial output before returning.
    #[instrument(skip(self), fields(session = %session, total_chunks))]
    pub async fn reassemble(
        &self,
        session: &SessionId,
        total_chunks: u64,
        output: &Path,
    ) -> StorageResult<()> {
        let result = self.reassemble_inner(session, total_chunks, output).await;
        if result.is_err() {
            let _ = fs::remove_file(output).await;
        }
        result
    }

    async fn reassemble_inner(
        &self,
        session: &SessionId,
        total_chunks: u64,
        output: &Path,
    ) -> StorageResult<()> {
        let mut out = fs::File::create(output).await?;
        let mut buf = vec![0u8; STREAM_BUF_SIZE];

        for index in 0..total_chunks {
            let path = self.chunk_path(session, index);
            let mut chunk = match fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::MissingChunk { index });
                }
                Err(e) => return Err(e.into()),
            };

            loop {
                let n = chunk.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).await?;
            }
        }

        out.sync_all().await?;
        Ok(())
    }

    /// Recursively delete a session's staging directory.
    ///
    /// Idempotent: a missing directory is not an error.
    #[instrument(skip(self), fields(session = %session))]
    pub async fn purge(&self, session: &SessionId) -> StorageResult<()> {
        match fs::remove_dir_all(self.session_dir(session)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every staging directory whose mtime is older than
    /// `now - timeout`. Returns the number of directories deleted.
    #[instrument(skip(self))]
    pub async fn purge_expired(
        &self,
        now: OffsetDateTime,
        timeout: Duration,
    ) -> StorageResult<usize> {
        let cutoff = now - timeout;
        let mut deleted = 0;

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(SESSION_DIR_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "failed to stat staging directory");
                    continue;
                }
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if OffsetDateTime::from(modified) < cutoff {
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {
                        deleted += 1;
                        tracing::info!(dir = %name, "purged expired staging directory");
                    }
                    Err(e) => {
                        tracing::warn!(dir = %name, error = %e, "failed to purge staging directory");
                    }
                }
            }
        }
        Ok(deleted)
    }
}
