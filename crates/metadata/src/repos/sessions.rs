//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Outcome of attempting to record a received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRecord {
    /// The chunk was new; the counter now reads `uploaded_chunks`.
    Recorded { uploaded_chunks: i64 },
    /// The chunk was already recorded; nothing changed.
    AlreadyRecorded { uploaded_chunks: i64 },
    /// The session is not in a chunk-accepting state (terminal or missing).
    NotActive,
}

/// Repository for upload session operations.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create a new session row.
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<()>;

    /// Get a session by id.
    async fn get_session(&self, session_id: &str) -> MetadataResult<Option<SessionRow>>;

    /// Record a received chunk for a session.
    ///
    /// This is the critical section of chunk receipt: in a single
    /// transaction it inserts the (session, index) receipt row if absent,
    /// and only on insert increments `uploaded_chunks`, promotes
    /// `initiated` to `uploading`, and stamps `updated_at`. Two concurrent
    /// calls for the same index therefore increment the counter exactly
    /// once, whichever wins.
    async fn record_chunk(
        &self,
        session_id: &str,
        chunk_index: i64,
        size_bytes: i64,
        received_at: OffsetDateTime,
    ) -> MetadataResult<ChunkRecord>;

    /// Check whether a chunk receipt row exists.
    async fn chunk_recorded(&self, session_id: &str, chunk_index: i64) -> MetadataResult<bool>;

    /// Transition a session to `completed`, recording the stored path.
    ///
    /// Conditional on the session still being active; returns whether the
    /// transition happened.
    async fn mark_completed(
        &self,
        session_id: &str,
        storage_path: &str,
        completed_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Transition a session to `failed`, recording a short error
    /// description. Conditional on the session still being active.
    async fn mark_failed(
        &self,
        session_id: &str,
        error_detail: &str,
        failed_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Transition a session to `cancelled`. Conditional on the session
    /// still being active; returns whether the transition happened.
    async fn cancel_session(
        &self,
        session_id: &str,
        cancelled_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Count sessions currently in the given state.
    async fn count_sessions_in_state(&self, state: &str) -> MetadataResult<u64>;
}
