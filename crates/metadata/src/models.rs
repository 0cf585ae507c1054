//! Database models mapping to the session schema.

use hopper_core::SessionState;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    /// Opaque owner token; None means anonymous.
    pub owner: Option<String>,
    pub filename: String,
    pub media_type: String,
    pub total_size: i64,
    /// Declared MD5 digest, lowercase hex.
    pub md5_hex: String,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub uploaded_chunks: i64,
    pub state: String,
    /// Relative stored-object path, set when the session completes.
    pub storage_path: Option<String>,
    /// Short error description, set when finalisation fails.
    pub error_detail: Option<String>,
    pub created_at: OffsetDateTime,
    /// Stamped on creation and on every received chunk.
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl SessionRow {
    /// Parse the state column into the domain enum.
    pub fn session_state(&self) -> crate::MetadataResult<SessionState> {
        SessionState::parse(&self.state).map_err(|_| {
            crate::MetadataError::CorruptRow(format!(
                "session {} has unknown state '{}'",
                self.session_id, self.state
            ))
        })
    }
}

/// Per-chunk receipt record.
///
/// A row exists iff the chunk at this index was counted toward the session's
/// progress. The primary key (session_id, chunk_index) is what makes the
/// counter increment at-most-once.
#[derive(Debug, Clone, FromRow)]
pub struct SessionChunkRow {
    pub session_id: String,
    pub chunk_index: i64,
    pub size_bytes: i64,
    pub received_at: OffsetDateTime,
}
