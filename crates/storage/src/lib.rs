//! Filesystem storage for the Hopper ingest service.
//!
//! Three components live here, each owning one region of disk:
//! - [`StagingArea`] — per-session chunk directories under the staging root
//! - [`MediaStore`] — the date/owner-organised layout of finalised objects
//! - [`DedupIndex`] — the digest-to-path map used to short-circuit uploads
//!
//! plus the streaming MD5 [`file_digest`] used at finalisation.

pub mod dedup;
pub mod digest;
pub mod error;
pub mod object;
pub mod staging;

pub use dedup::{DedupIndex, JsonDedupIndex};
pub use digest::file_digest;
pub use error::{StorageError, StorageResult};
pub use object::{MediaStore, StoreStats, SweepStats};
pub use staging::StagingArea;

/// Buffer size for streaming file reads and copies (64 KiB).
pub(crate) const STREAM_BUF_SIZE: usize = 64 * 1024;
