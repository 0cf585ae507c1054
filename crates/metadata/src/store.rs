//! Session store trait and SQLite implementation.

use crate::error::MetadataResult;
use crate::models::SessionRow;
use crate::repos::sessions::{ChunkRecord, SessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined session store trait.
#[async_trait]
pub trait SessionStore: SessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based session store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, running migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for SqliteStore {
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, owner, filename, media_type, total_size, md5_hex,
                chunk_size, total_chunks, uploaded_chunks, state, storage_path,
                error_detail, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.owner)
        .bind(&session.filename)
        .bind(&session.media_type)
        .bind(session.total_size)
        .bind(&session.md5_hex)
        .bind(session.chunk_size)
        .bind(session.total_chunks)
        .bind(session.uploaded_chunks)
        .bind(&session.state)
        .bind(&session.storage_path)
        .bind(&session.error_detail)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> MetadataResult<Option<SessionRow>> {
        let row =
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn record_chunk(
        &self,
        session_id: &str,
        chunk_index: i64,
        size_bytes: i64,
        received_at: OffsetDateTime,
    ) -> MetadataResult<ChunkRecord> {
        let mut tx = self.pool.begin().await?;

        // Atomic insert-if-absent, gated on the session still accepting
        // chunks. The single statement prevents the TOCTOU race where two
        // concurrent receives of the same index both see "absent" and both
        // increment the counter.
        let inserted = sqlx::query(
            r#"
            INSERT INTO session_chunks (session_id, chunk_index, size_bytes, received_at)
            SELECT ?1, ?2, ?3, ?4
            WHERE EXISTS (
                SELECT 1 FROM sessions
                WHERE session_id = ?1 AND state IN ('initiated', 'uploading')
            )
            AND NOT EXISTS (
                SELECT 1 FROM session_chunks
                WHERE session_id = ?1 AND chunk_index = ?2
            )
            "#,
        )
        .bind(session_id)
        .bind(chunk_index)
        .bind(size_bytes)
        .bind(received_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            sqlx::query(
                r#"
                UPDATE sessions
                SET uploaded_chunks = uploaded_chunks + 1,
                    state = CASE WHEN state = 'initiated' THEN 'uploading' ELSE state END,
                    updated_at = ?2
                WHERE session_id = ?1
                "#,
            )
            .bind(session_id)
            .bind(received_at)
            .execute(&mut *tx)
            .await?;

            let uploaded_chunks: i64 =
                sqlx::query_scalar("SELECT uploaded_chunks FROM sessions WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_one(&mut *tx)
                    .await?;

            tx.commit().await?;
            return Ok(ChunkRecord::Recorded { uploaded_chunks });
        }

        // Nothing inserted: either the chunk was already recorded, or the
        // session is terminal/missing.
        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM session_chunks WHERE session_id = ? AND chunk_index = ?)",
        )
        .bind(session_id)
        .bind(chunk_index)
        .fetch_one(&mut *tx)
        .await?;

        if already {
            let uploaded_chunks: i64 =
                sqlx::query_scalar("SELECT uploaded_chunks FROM sessions WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.commit().await?;
            Ok(ChunkRecord::AlreadyRecorded { uploaded_chunks })
        } else {
            tx.commit().await?;
            Ok(ChunkRecord::NotActive)
        }
    }

    async fn chunk_recorded(&self, session_id: &str, chunk_index: i64) -> MetadataResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM session_chunks WHERE session_id = ? AND chunk_index = ?)",
        )
        .bind(session_id)
        .bind(chunk_index)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_completed(
        &self,
        session_id: &str,
        storage_path: &str,
        completed_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET state = 'completed', storage_path = ?2, completed_at = ?3, updated_at = ?3
            WHERE session_id = ?1 AND state IN ('initiated', 'uploading')
            "#,
        )
        .bind(session_id)
        .bind(storage_path)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        session_id: &str,
        error_detail: &str,
        failed_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET state = 'failed', error_detail = ?2, updated_at = ?3
            WHERE session_id = ?1 AND state IN ('initiated', 'uploading')
            "#,
        )
        .bind(session_id)
        .bind(error_detail)
        .bind(failed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_session(
        &self,
        session_id: &str,
        cancelled_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET state = 'cancelled', updated_at = ?2
            WHERE session_id = ?1 AND state IN ('initiated', 'uploading')
            "#,
        )
        .bind(session_id)
        .bind(cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_sessions_in_state(&self, state: &str) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE state = ?")
            .bind(state)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Upload sessions
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    owner TEXT,
    filename TEXT NOT NULL,
    media_type TEXT NOT NULL,
    total_size INTEGER NOT NULL,
    md5_hex TEXT NOT NULL,
    chunk_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    uploaded_chunks INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'initiated',
    storage_path TEXT,
    error_detail TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
CREATE INDEX IF NOT EXISTS idx_sessions_digest ON sessions(md5_hex);

-- Per-chunk receipt records. The primary key is the at-most-once gate for
-- the uploaded_chunks counter.
CREATE TABLE IF NOT EXISTS session_chunks (
    session_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    received_at TEXT NOT NULL,
    PRIMARY KEY (session_id, chunk_index),
    FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::SessionState;

    fn sample_session(id: &str) -> SessionRow {
        let now = OffsetDateTime::now_utc();
        SessionRow {
            session_id: id.to_string(),
            owner: None,
            filename: "clip.mp4".to_string(),
            media_type: "video/mp4".to_string(),
            total_size: 3 * 1024 * 1024 + 100,
            md5_hex: "900150983cd24fb0d6963f7d28e17f72".to_string(),
            chunk_size: 1024 * 1024,
            total_chunks: 4,
            uploaded_chunks: 0,
            state: SessionState::Initiated.as_str().to_string(),
            storage_path: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("sessions.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let (_dir, store) = test_store().await;
        store
            .create_session(&sample_session("20240101000000-0000000000000001"))
            .await
            .unwrap();

        let row = store
            .get_session("20240101000000-0000000000000001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.total_chunks, 4);
        assert_eq!(row.session_state().unwrap(), SessionState::Initiated);

        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_chunk_increments_once() {
        let (_dir, store) = test_store().await;
        let id = "20240101000000-0000000000000002";
        store.create_session(&sample_session(id)).await.unwrap();
        let now = OffsetDateTime::now_utc();

        let first = store.record_chunk(id, 0, 1024, now).await.unwrap();
        assert_eq!(first, ChunkRecord::Recorded { uploaded_chunks: 1 });

        // Replay of the same index does not increment.
        let replay = store.record_chunk(id, 0, 1024, now).await.unwrap();
        assert_eq!(replay, ChunkRecord::AlreadyRecorded { uploaded_chunks: 1 });

        // First chunk promotes the session to uploading.
        let row = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(row.session_state().unwrap(), SessionState::Uploading);
        assert_eq!(row.uploaded_chunks, 1);
    }

    #[tokio::test]
    async fn test_record_chunk_rejected_after_cancel() {
        let (_dir, store) = test_store().await;
        let id = "20240101000000-0000000000000003";
        store.create_session(&sample_session(id)).await.unwrap();
        let now = OffsetDateTime::now_utc();

        assert!(store.cancel_session(id, now).await.unwrap());
        let outcome = store.record_chunk(id, 1, 1024, now).await.unwrap();
        assert_eq!(outcome, ChunkRecord::NotActive);

        // Counter untouched, state terminal.
        let row = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(row.uploaded_chunks, 0);
        assert_eq!(row.session_state().unwrap(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_single_winner() {
        let (_dir, store) = test_store().await;
        let id = "20240101000000-0000000000000004";
        store.create_session(&sample_session(id)).await.unwrap();
        let now = OffsetDateTime::now_utc();

        assert!(store.mark_completed(id, "2024/01/01/anonymous/clip_x.mp4", now).await.unwrap());
        // Completed is terminal: no further transition wins.
        assert!(!store.cancel_session(id, now).await.unwrap());
        assert!(!store.mark_failed(id, "late failure", now).await.unwrap());
        assert!(!store.mark_completed(id, "elsewhere", now).await.unwrap());

        let row = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(row.session_state().unwrap(), SessionState::Completed);
        assert_eq!(
            row.storage_path.as_deref(),
            Some("2024/01/01/anonymous/clip_x.mp4")
        );
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_count_sessions_in_state() {
        let (_dir, store) = test_store().await;
        store
            .create_session(&sample_session("20240101000000-0000000000000005"))
            .await
            .unwrap();
        store
            .create_session(&sample_session("20240101000000-0000000000000006"))
            .await
            .unwrap();

        assert_eq!(store.count_sessions_in_state("initiated").await.unwrap(), 2);
        assert_eq!(store.count_sessions_in_state("completed").await.unwrap(), 0);
    }
}
