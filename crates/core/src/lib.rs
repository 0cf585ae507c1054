//! Core domain types and shared logic for the Hopper ingest service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Upload session identifiers and lifecycle states
//! - MD5 content digests
//! - Media type signatures and metadata validation
//! - Protocol request/response types
//! - Configuration types

pub mod config;
pub mod digest;
pub mod error;
pub mod media;
pub mod session;

pub use config::AppConfig;
pub use digest::{Md5Digest, Md5Hasher};
pub use error::{Error, Result};
pub use media::SignatureCheck;
pub use session::{SessionId, SessionState};

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default maximum declared file size: 500 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Number of leading bytes read for content signature checks.
pub const SIGNATURE_PREFIX_LEN: usize = 32;
