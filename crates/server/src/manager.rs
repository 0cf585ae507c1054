//! Upload session manager.
//!
//! Orchestrates the five operations of the upload protocol — initiate,
//! receive-chunk, finalize, status, cancel — over the session store, the
//! chunk staging area, the object store, and the dedup index.
//!
//! Concurrency model: chunk receipt relies on the session store's atomic
//! insert-if-absent gate, so arbitrary chunks of one session may arrive in
//! parallel. Finalize and cancel are serialised per session by an async
//! lock keyed by session id; entries exist only for known sessions with a
//! finalize or cancel in flight, and the state-conditional SQL transitions
//! remain the backstop, so exactly one terminal transition ever wins.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BYTES_STAGED, CHUNKS_RECEIVED, CHUNKS_REPLAYED, DUPLICATES_SUPPRESSED, FINALIZE_DURATION,
    SESSIONS_CANCELLED, SESSIONS_COMPLETED, SESSIONS_FAILED, SESSIONS_INITIATED,
};
use hopper_core::config::AppConfig;
use hopper_core::media::{SignatureCheck, check_signature, validate_metadata};
use hopper_core::session::{
    ChunkResponse, InitiateRequest, InitiateResponse, SessionView, progress_percent,
};
use hopper_core::{Md5Digest, SIGNATURE_PREFIX_LEN, SessionId, SessionState};
use hopper_metadata::models::SessionRow;
use hopper_metadata::{ChunkRecord, SessionRepo, SessionStore};
use hopper_storage::{DedupIndex, MediaStore, StagingArea, file_digest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The server-side upload manager.
pub struct UploadManager {
    config: Arc<AppConfig>,
    sessions: Arc<dyn SessionStore>,
    staging: Arc<StagingArea>,
    objects: Arc<MediaStore>,
    dedup: Arc<dyn DedupIndex>,
    /// Per-session locks serialising finalize/cancel.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UploadManager {
    /// Create a new manager over its component stores.
    pub fn new(
        config: Arc<AppConfig>,
        sessions: Arc<dyn SessionStore>,
        staging: Arc<StagingArea>,
        objects: Arc<MediaStore>,
        dedup: Arc<dyn DedupIndex>,
    ) -> Self {
        Self {
            config,
            sessions,
            staging,
            objects,
            dedup,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Initiate an upload session.
    ///
    /// Validates the declared metadata, consults the dedup index, and only
    /// then creates the session row — a failed initiate never leaves an
    /// orphan session behind.
    #[tracing::instrument(skip(self, req), fields(filename = %req.filename, size = req.file_size))]
    pub async fn initiate(
        &self,
        req: &InitiateRequest,
        owner: Option<String>,
    ) -> ApiResult<InitiateResponse> {
        let errors = validate_metadata(
            &req.filename,
            &req.mime_type,
            req.file_size,
            self.config.server.max_file_size,
            &self.config.server.allowed_types,
        );
        if !errors.is_empty() {
            return Err(ApiError::Validation { errors });
        }

        // Declared sizes are stored as i64; anything past that bound is
        // unrepresentable regardless of the configured cap.
        if req.file_size > i64::MAX as u64 {
            return Err(ApiError::InvalidArgument(format!(
                "fileSize {} exceeds maximum supported size",
                req.file_size
            )));
        }

        let digest = Md5Digest::from_hex(&req.md5_hash)
            .map_err(|e| ApiError::InvalidArgument(format!("invalid md5Hash: {e}")))?;

        // Identical content already on disk short-circuits the upload
        // entirely. The lookup re-checks object existence, so a swept
        // object never produces a duplicate answer.
        if let Some(storage_path) = self.dedup.lookup(&digest).await? {
            DUPLICATES_SUPPRESSED.inc();
            tracing::info!(digest = %digest, path = %storage_path, "duplicate upload suppressed");
            return Ok(InitiateResponse::Duplicate {
                success: true,
                duplicate: true,
                storage_path,
            });
        }

        let chunk_size = self.config.server.chunk_size;
        let total_chunks = req.file_size.div_ceil(chunk_size);
        let now = OffsetDateTime::now_utc();
        let session_id = SessionId::generate(now);

        let row = SessionRow {
            session_id: session_id.to_string(),
            owner,
            filename: req.filename.clone(),
            media_type: req.mime_type.clone(),
            total_size: req.file_size as i64,
            md5_hex: digest.to_hex(),
            chunk_size: chunk_size as i64,
            total_chunks: total_chunks as i64,
            uploaded_chunks: 0,
            state: SessionState::Initiated.as_str().to_string(),
            storage_path: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.sessions.create_session(&row).await?;

        SESSIONS_INITIATED.inc();
        tracing::info!(
            session_id = %session_id,
            total_chunks,
            media_type = %req.mime_type,
            "created upload session"
        );

        Ok(InitiateResponse::Created {
            success: true,
            upload_id: session_id.to_string(),
            total_chunks,
            chunk_size,
        })
    }

    /// Receive one chunk for a session.
    ///
    /// Chunks may arrive in any order and any number of times; a replayed
    /// index succeeds without rewriting and without touching the counter.
    #[tracing::instrument(skip(self, data), fields(upload_id = %upload_id, index, size = data.len()))]
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        index: u64,
        data: &[u8],
    ) -> ApiResult<ChunkResponse> {
        let (session_id, session) = self.load_session(upload_id).await?;
        let state = session.session_state()?;
        if state.is_terminal() {
            return Err(ApiError::Conflict(format!(
                "upload session is {state}, not accepting chunks"
            )));
        }

        let total_chunks = session.total_chunks as u64;
        if index >= total_chunks {
            return Err(ApiError::InvalidArgument(format!(
                "chunk index {index} out of range (session has {total_chunks} chunks)"
            )));
        }

        // Replay fast path: the receipt row is the authoritative gate, the
        // staged file existence check catches a crash that recorded the
        // chunk without durably staging it (then we re-stage below).
        if self.sessions.chunk_recorded(session_id.as_str(), index as i64).await?
            && self.staging.has_chunk(&session_id, index).await?
        {
            CHUNKS_REPLAYED.inc();
            return Ok(already_uploaded(index));
        }

        self.staging.stage_chunk(&session_id, index, data).await?;

        let now = OffsetDateTime::now_utc();
        match self
            .sessions
            .record_chunk(session_id.as_str(), index as i64, data.len() as i64, now)
            .await?
        {
            ChunkRecord::Recorded { uploaded_chunks } => {
                CHUNKS_RECEIVED.inc();
                BYTES_STAGED.inc_by(data.len() as u64);
                let uploaded_chunks = uploaded_chunks as u64;
                tracing::debug!(
                    session_id = %session_id,
                    index,
                    uploaded_chunks,
                    total_chunks,
                    "chunk staged"
                );
                Ok(ChunkResponse::Accepted {
                    success: true,
                    chunk_index: index,
                    uploaded_chunks,
                    total_chunks,
                    progress: progress_percent(uploaded_chunks, total_chunks),
                })
            }
            ChunkRecord::AlreadyRecorded { .. } => {
                // Lost a same-index race; the winner incremented the counter.
                CHUNKS_REPLAYED.inc();
                Ok(already_uploaded(index))
            }
            ChunkRecord::NotActive => Err(ApiError::Conflict(
                "upload session is no longer accepting chunks".to_string(),
            )),
        }
    }

    /// Finalise a session: reassemble, verify, validate, store, register.
    ///
    /// Returns the stored object's relative path. On an already Completed
    /// session this returns the existing path idempotently.
    #[tracing::instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn finalize(&self, upload_id: &str) -> ApiResult<String> {
        // Existence first: this endpoint is unauthenticated, and unknown or
        // malformed ids must not grow the lock map.
        self.load_session(upload_id).await?;

        let lock = self.session_lock(upload_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.finalize_locked(upload_id).await
        };
        self.release_lock_if_idle(upload_id, &lock).await;
        result
    }

    /// Finalize body run under the per-session lock.
    async fn finalize_locked(&self, upload_id: &str) -> ApiResult<String> {
        let start = Instant::now();
        // Re-read under the lock; the state may have changed while waiting.
        let (session_id, session) = self.load_session(upload_id).await?;
        match session.session_state()? {
            SessionState::Completed => {
                // A second finalize on a completed session is answered with
                // the already-stored path.
                return session.storage_path.clone().ok_or_else(|| {
                    ApiError::Internal("completed session has no stored path".to_string())
                });
            }
            state if state.is_terminal() => {
                return Err(ApiError::Conflict(format!("upload session is {state}")));
            }
            _ => {}
        }

        if session.uploaded_chunks < session.total_chunks {
            return Err(ApiError::FailedPrecondition(format!(
                "upload incomplete: {} of {} chunks received",
                session.uploaded_chunks, session.total_chunks
            )));
        }

        let result = self.finalize_pipeline(&session_id, &session).await;
        FINALIZE_DURATION.observe(start.elapsed().as_secs_f64());
        result
    }

    /// The finalisation pipeline proper. Caller holds the session lock and
    /// has checked the precondition.
    ///
    /// Integrity, content, and data-loss aborts mark the session Failed and
    /// leave staged chunks in place for inspection; I/O faults abort with
    /// an internal error and leave the session untouched so an operator can
    /// retry.
    async fn finalize_pipeline(
        &self,
        session_id: &SessionId,
        session: &SessionRow,
    ) -> ApiResult<String> {
        let temp = self
            .staging
            .root()
            .join(format!(".assemble.{}", Uuid::new_v4()));

        // 1. Reassemble staged chunks in index order.
        if let Err(e) = self
            .staging
            .reassemble(session_id, session.total_chunks as u64, &temp)
            .await
        {
            return match e {
                hopper_storage::StorageError::MissingChunk { index } => {
                    let detail = format!("staged chunk {index} is missing");
                    self.fail_session(session_id, &detail).await;
                    Err(ApiError::DataLoss(detail))
                }
                other => Err(other.into()),
            };
        }

        // 2. Verify the declared digest over the assembled bytes.
        let expected = Md5Digest::from_hex(&session.md5_hex)
            .map_err(|e| ApiError::Internal(format!("stored digest unparseable: {e}")))?;
        let actual = match file_digest(&temp).await {
            Ok(digest) => digest,
            Err(e) => {
                self.discard_temp(&temp).await;
                return Err(e.into());
            }
        };
        if actual != expected {
            self.discard_temp(&temp).await;
            self.fail_session(session_id, "md5 digest mismatch").await;
            return Err(ApiError::Integrity {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        // 3. Validate content signature against the declared media type.
        let prefix = match read_signature_prefix(&temp).await {
            Ok(prefix) => prefix,
            Err(e) => {
                self.discard_temp(&temp).await;
                return Err(e);
            }
        };
        match check_signature(&prefix, &session.media_type) {
            SignatureCheck::Ok => {}
            SignatureCheck::Mismatch { detected } => {
                self.discard_temp(&temp).await;
                let detail = format!(
                    "content does not match declared type {} (detected {detected})",
                    session.media_type
                );
                self.fail_session(session_id, &detail).await;
                return Err(ApiError::InvalidContent(detail));
            }
            SignatureCheck::Undetected => {
                self.discard_temp(&temp).await;
                let detail = format!(
                    "content does not match any known signature for {}",
                    session.media_type
                );
                self.fail_session(session_id, &detail).await;
                return Err(ApiError::InvalidContent(detail));
            }
        }

        // 4. Materialise into the object store.
        let now = OffsetDateTime::now_utc();
        let storage_path = match self
            .objects
            .store(&temp, &session.filename, session.owner.as_deref(), now)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                self.discard_temp(&temp).await;
                return Err(e.into());
            }
        };

        // 5. Register in the dedup index. The stored object is already
        // durable; a failed registration merely foregoes dedup for this
        // content, so it does not abort the commit.
        if let Err(e) = self.dedup.register(&expected, &storage_path).await {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "failed to register dedup entry"
            );
        }

        // 6. Commit the session.
        let transitioned = self
            .sessions
            .mark_completed(session_id.as_str(), &storage_path, now)
            .await?;
        if !transitioned {
            // Another terminal transition won the conditional update. The
            // stored object is immutable and will age out via retention.
            tracing::warn!(
                session_id = %session_id,
                path = %storage_path,
                "session reached a terminal state during finalisation"
            );
            return Err(ApiError::Conflict(
                "upload session reached a terminal state during finalisation".to_string(),
            ));
        }

        // 7. Discard staged chunks.
        if let Err(e) = self.staging.purge(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to purge staging");
        }

        SESSIONS_COMPLETED.inc();
        tracing::info!(
            session_id = %session_id,
            path = %storage_path,
            size = session.total_size,
            "upload finalised"
        );
        Ok(storage_path)
    }

    /// Report a session's full state.
    pub async fn status(&self, upload_id: &str) -> ApiResult<SessionView> {
        let (_, session) = self.load_session(upload_id).await?;
        session_view(&session)
    }

    /// Cancel a session and asynchronously reclaim its staging directory.
    #[tracing::instrument(skip(self), fields(upload_id = %upload_id))]
    pub async fn cancel(&self, upload_id: &str) -> ApiResult<()> {
        // Existence first, as in finalize: no lock entry for unknown ids.
        self.load_session(upload_id).await?;

        let lock = self.session_lock(upload_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(upload_id).await
        };
        self.release_lock_if_idle(upload_id, &lock).await;
        result
    }

    /// Cancel body run under the per-session lock.
    async fn cancel_locked(&self, upload_id: &str) -> ApiResult<()> {
        let (session_id, session) = self.load_session(upload_id).await?;
        let now = OffsetDateTime::now_utc();
        if !self.sessions.cancel_session(session_id.as_str(), now).await? {
            let state = session.session_state()?;
            return Err(ApiError::Conflict(format!(
                "upload session is already {state}"
            )));
        }

        SESSIONS_CANCELLED.inc();
        tracing::info!(session_id = %session_id, "upload cancelled");

        // Staging cleanup happens off the request path.
        let staging = self.staging.clone();
        let to_purge = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = staging.purge(&to_purge).await {
                tracing::warn!(session_id = %to_purge, error = %e, "failed to purge staging");
            }
        });

        Ok(())
    }

    async fn load_session(&self, upload_id: &str) -> ApiResult<(SessionId, SessionRow)> {
        // A malformed id cannot name a session; report it the same way.
        let session_id = SessionId::parse(upload_id)
            .map_err(|_| ApiError::NotFound("upload session not found".to_string()))?;
        let session = self
            .sessions
            .get_session(session_id.as_str())
            .await?
            .ok_or_else(|| ApiError::NotFound("upload session not found".to_string()))?;
        Ok((session_id, session))
    }

    async fn fail_session(&self, session_id: &SessionId, detail: &str) {
        let now = OffsetDateTime::now_utc();
        match self
            .sessions
            .mark_failed(session_id.as_str(), detail, now)
            .await
        {
            Ok(true) => SESSIONS_FAILED.inc(),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "failed to mark session as failed"
                );
            }
        }
    }

    async fn discard_temp(&self, temp: &std::path::Path) {
        if let Err(e) = tokio::fs::remove_file(temp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %temp.display(), error = %e, "failed to remove temp file");
        }
    }

    async fn session_lock(&self, upload_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks.entry(upload_id.to_string()).or_default().clone()
    }

    /// Drop the lock entry once no other task holds it, so the map never
    /// outgrows the set of sessions with in-flight finalize/cancel calls.
    /// Waiters that already cloned the Arc keep serialising among
    /// themselves, and the state-conditional updates keep terminal states
    /// terminal for any caller that arrives on a fresh lock.
    async fn release_lock_if_idle(&self, upload_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.session_locks.lock().await;
        // Two strong references mean the map's entry and ours: nobody else
        // is waiting on this lock.
        if let Some(current) = locks.get(upload_id)
            && Arc::ptr_eq(current, lock)
            && Arc::strong_count(current) <= 2
        {
            locks.remove(upload_id);
        }
    }
}

fn already_uploaded(index: u64) -> ChunkResponse {
    ChunkResponse::AlreadyUploaded {
        success: true,
        message: "Chunk already uploaded".to_string(),
        chunk_index: index,
    }
}

/// Read up to the signature prefix length from the head of a file.
async fn read_signature_prefix(path: &std::path::Path) -> ApiResult<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to open assembled file: {e}")))?;
    let mut prefix = vec![0u8; SIGNATURE_PREFIX_LEN];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = file
            .read(&mut prefix[filled..])
            .await
            .map_err(|e| ApiError::Internal(format!("failed to read assembled file: {e}")))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);
    Ok(prefix)
}

/// Build the wire view of a session row.
fn session_view(session: &SessionRow) -> ApiResult<SessionView> {
    let format_ts = |ts: OffsetDateTime| {
        ts.format(&Rfc3339)
            .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
    };

    Ok(SessionView {
        upload_id: session.session_id.clone(),
        owner: session.owner.clone(),
        filename: session.filename.clone(),
        mime_type: session.media_type.clone(),
        file_size: session.total_size as u64,
        md5_hash: session.md5_hex.clone(),
        total_chunks: session.total_chunks as u64,
        uploaded_chunks: session.uploaded_chunks as u64,
        progress: progress_percent(session.uploaded_chunks as u64, session.total_chunks as u64),
        status: session.state.clone(),
        storage_path: session.storage_path.clone(),
        error: session.error_detail.clone(),
        created_at: format_ts(session.created_at)?,
        updated_at: format_ts(session.updated_at)?,
        completed_at: session.completed_at.map(format_ts).transpose()?,
    })
}
