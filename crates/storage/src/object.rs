//! Object store: the date/owner-organised layout of finalised media.
//!
//! Stored objects live at relative paths of the shape
//! `YYYY/MM/DD/{owner}/{sanitised-stem}_{unique-suffix}.{ext}` and are
//! immutable once written. The unique suffix — not the sanitised stem — is
//! what guarantees path uniqueness.

use crate::error::{StorageError, StorageResult};
use rand::Rng;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tracing::instrument;

/// Filename of the dedup index kept inside the storage root. Exempt from
/// stats and retention sweeps.
pub const DEDUP_INDEX_FILENAME: &str = "md5_index.json";

/// Maximum length of a sanitised filename stem.
const MAX_STEM_LEN: usize = 100;

/// Owner segment used when no owner token was supplied.
const ANONYMOUS_OWNER: &str = "anonymous";

/// Aggregate numbers for the stored tree.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub files: u64,
    pub bytes: u64,
}

/// Result of a retention sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    pub scanned: u64,
    pub deleted: u64,
    pub errors: u64,
    pub freed_bytes: u64,
}

/// Filesystem object store for finalised uploads.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Create a new object store rooted at the given directory.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path against the root, rejecting traversal.
    pub fn full_path(&self, relative: &str) -> StorageResult<PathBuf> {
        if relative.is_empty() {
            return Err(StorageError::InvalidKey("empty path".to_string()));
        }
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {relative}"
                    )));
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// Move a finalised file into its canonical location.
    ///
    /// Returns the path relative to the storage root, with `/` separators.
    #[instrument(skip(self, source), fields(filename = %original_filename))]
    pub async fn store(
        &self,
        source: &Path,
        original_filename: &str,
        owner: Option<&str>,
        now: OffsetDateTime,
    ) -> StorageResult<String> {
        let owner = owner.filter(|o| !o.is_empty()).unwrap_or(ANONYMOUS_OWNER);
        let (stem, ext) = split_filename(original_filename);

        let mut name = format!("{}_{}", sanitize_stem(stem), unique_suffix(now));
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(&ext);
        }

        let relative = format!(
            "{:04}/{:02}/{:02}/{}/{}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            sanitize_stem(owner),
            name
        );

        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Rename is atomic within a filesystem; fall back to copy + remove
        // when the source lives on another device.
        match fs::rename(source, &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                fs::copy(source, &target).await?;
                fs::remove_file(source).await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(relative)
    }

    /// Check whether a stored object exists.
    pub async fn exists(&self, relative: &str) -> StorageResult<bool> {
        Ok(fs::try_exists(self.full_path(relative)?).await?)
    }

    /// Delete a stored object.
    pub async fn delete(&self, relative: &str) -> StorageResult<()> {
        let path = self.full_path(relative)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(relative.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Recursive file count and byte total, ignoring the dedup index file.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> StorageResult<StoreStats> {
        let mut stats = StoreStats::default();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    if dir == self.root && entry.file_name() == DEDUP_INDEX_FILENAME {
                        continue;
                    }
                    stats.files += 1;
                    stats.bytes += entry.metadata().await?.len();
                }
            }
        }
        Ok(stats)
    }

    /// Delete every stored object whose mtime is older than
    /// `now - retention`, then remove directories left empty.
    #[instrument(skip(self))]
    pub async fn purge_expired(
        &self,
        now: OffsetDateTime,
        retention: Duration,
    ) -> StorageResult<SweepStats> {
        let cutoff = now - retention;
        let mut stats = SweepStats::default();
        let mut stack = vec![self.root.clone()];
        let mut dirs = Vec::new();

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    dirs.push(path.clone());
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                if dir == self.root && entry.file_name() == DEDUP_INDEX_FILENAME {
                    continue;
                }

                stats.scanned += 1;
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to stat object");
                        stats.errors += 1;
                        continue;
                    }
                };
                let Ok(modified) = metadata.modified() else {
                    stats.errors += 1;
                    continue;
                };
                if OffsetDateTime::from(modified) >= cutoff {
                    continue;
                }

                match fs::remove_file(&path).await {
                    Ok(()) => {
                        stats.deleted += 1;
                        stats.freed_bytes += metadata.len();
                        tracing::info!(path = %path.display(), "purged expired object");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to purge object");
                        stats.errors += 1;
                    }
                }
            }
        }

        // Deepest-first so emptied parents can go too. remove_dir refuses
        // non-empty directories, which is exactly the behaviour wanted.
        dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for dir in dirs {
            let _ = fs::remove_dir(&dir).await;
        }

        Ok(stats)
    }
}

/// Split a filename into stem and lower-cased extension.
fn split_filename(filename: &str) -> (&str, Option<String>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem, Some(ext.to_ascii_lowercase()))
        }
        _ => (filename, None),
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` and truncate.
///
/// Lossy and non-injective; uniqueness comes from the suffix, never from
/// the sanitised stem.
fn sanitize_stem(stem: &str) -> String {
    let mut out: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_STEM_LEN);
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Time-monotonic unique suffix: 13-digit unix milliseconds plus 40 bits of
/// randomness as 10 hex chars (23 chars total).
fn unique_suffix(now: OffsetDateTime) -> String {
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let random: u64 = rand::rng().random::<u64>() & 0xff_ffff_ffff;
    format!("{millis:013}{random:010x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, MediaStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().join("storage")).await.unwrap();
        (dir, store)
    }

    fn fixed_now() -> OffsetDateTime {
        time::macros::datetime!(2024-03-05 12:00:00 UTC)
    }

    #[tokio::test]
    async fn test_store_layout() {
        let (dir, store) = store().await;
        let source = dir.path().join("incoming");
        std::fs::write(&source, b"payload").unwrap();

        let relative = store
            .store(&source, "My Photo (1).JPG", None, fixed_now())
            .await
            .unwrap();

        assert!(relative.starts_with("2024/03/05/anonymous/My_Photo__1__"));
        assert!(relative.ends_with(".jpg"));
        assert!(store.exists(&relative).await.unwrap());
        assert!(!source.exists());
        assert_eq!(
            std::fs::read(store.full_path(&relative).unwrap()).unwrap(),
            b"payload"
        );
    }

    #[tokio::test]
    async fn test_store_owner_segment() {
        let (dir, store) = store().await;
        let source = dir.path().join("incoming");
        std::fs::write(&source, b"x").unwrap();

        let relative = store
            .store(&source, "a.png", Some("user-42"), fixed_now())
            .await
            .unwrap();
        assert!(relative.starts_with("2024/03/05/user-42/a_"));
    }

    #[tokio::test]
    async fn test_unique_suffix_shape() {
        let suffix = unique_suffix(fixed_now());
        assert_eq!(suffix.len(), 23);
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(suffix, unique_suffix(fixed_now()));
    }

    #[tokio::test]
    async fn test_same_name_never_collides() {
        let (dir, store) = store().await;
        let mut paths = Vec::new();
        for i in 0..4 {
            let source = dir.path().join(format!("in{i}"));
            std::fs::write(&source, b"x").unwrap();
            paths.push(
                store
                    .store(&source, "same.jpg", None, fixed_now())
                    .await
                    .unwrap(),
            );
        }
        let unique: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[tokio::test]
    async fn test_sanitize_stem() {
        assert_eq!(sanitize_stem("héllo wörld"), "h_llo_w_rld");
        assert_eq!(sanitize_stem("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_stem(""), "_");
        assert_eq!(sanitize_stem(&"x".repeat(200)).len(), MAX_STEM_LEN);
    }

    #[tokio::test]
    async fn test_full_path_rejects_traversal() {
        let (_dir, store) = store().await;
        assert!(store.full_path("../escape").is_err());
        assert!(store.full_path("/absolute").is_err());
        assert!(store.full_path("a/../../b").is_err());
        assert!(store.full_path("2024/03/05/anonymous/a.jpg").is_ok());
    }

    #[tokio::test]
    async fn test_stats_skips_index_file() {
        let (dir, store) = store().await;
        let source = dir.path().join("incoming");
        std::fs::write(&source, b"12345678").unwrap();
        store
            .store(&source, "a.gif", None, fixed_now())
            .await
            .unwrap();
        std::fs::write(store.root().join(DEDUP_INDEX_FILENAME), b"{}").unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 8);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_old_and_empty_dirs() {
        let (dir, store) = store().await;

        let old_src = dir.path().join("old");
        std::fs::write(&old_src, b"old-bytes").unwrap();
        let old = store
            .store(&old_src, "old.png", None, fixed_now())
            .await
            .unwrap();

        let fresh_src = dir.path().join("fresh");
        std::fs::write(&fresh_src, b"fresh").unwrap();
        let fresh = store
            .store(&fresh_src, "fresh.png", Some("keeper"), fixed_now())
            .await
            .unwrap();

        std::fs::write(store.root().join(DEDUP_INDEX_FILENAME), b"{}").unwrap();

        // Back-date the old object beyond the retention horizon.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(40 * 86400);
        let file = std::fs::File::options()
            .write(true)
            .open(store.full_path(&old).unwrap())
            .unwrap();
        file.set_times(std::fs::FileTimes::new().set_modified(past))
            .unwrap();

        let stats = store
            .purge_expired(OffsetDateTime::now_utc(), Duration::days(30))
            .await
            .unwrap();

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.freed_bytes, 9);
        assert_eq!(stats.errors, 0);
        assert!(!store.exists(&old).await.unwrap());
        assert!(store.exists(&fresh).await.unwrap());
        // The index file survives the sweep.
        assert!(store.root().join(DEDUP_INDEX_FILENAME).exists());
        // The old object's owner directory was left empty and removed.
        assert!(!store.root().join("2024/03/05/anonymous").exists());
    }
}
