//! Streaming MD5 digest of files on disk.

use crate::error::{StorageError, StorageResult};
use crate::STREAM_BUF_SIZE;
use hopper_core::Md5Digest;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Compute the MD5 digest of a file, streaming it in fixed-size reads.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn file_digest(path: &Path) -> StorageResult<Md5Digest> {
    let mut file = fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io(e)
        }
    })?;

    let mut hasher = Md5Digest::hasher();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}
