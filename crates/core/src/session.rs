//! Upload session types, lifecycle states, and protocol messages.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Unique identifier for an upload session.
///
/// Format: `YYYYMMDDHHMMSS-{16 hex chars}` (UTC timestamp plus 64 bits of
/// randomness). The timestamp prefix keeps ids sortable in logs and on disk;
/// the random suffix makes them unguessable.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new session id for the given instant.
    pub fn generate(now: OffsetDateTime) -> Self {
        let suffix: u64 = rand::rng().random();
        Self(format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}-{:016x}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            suffix
        ))
    }

    /// Parse from a string, validating the format.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let bad = |reason: &str| crate::Error::InvalidSessionId(format!("{reason}: {s}"));

        let (stamp, hex) = s
            .split_once('-')
            .ok_or_else(|| bad("missing separator"))?;
        if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("expected 14-digit timestamp"));
        }
        if hex.len() != 16 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad("expected 16 hex chars"));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session state.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: a session never
/// leaves them, and chunk receipt and finalisation are rejected once any
/// of them is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session exists but no chunk has been staged yet.
    Initiated,
    /// At least one chunk has been staged.
    Uploading,
    /// Finalisation succeeded; the stored object exists.
    Completed,
    /// Finalisation hit an integrity, content, or data-loss error.
    Failed,
    /// Explicitly cancelled by the client.
    Cancelled,
}

impl SessionState {
    /// Lower-case wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from the lower-case wire name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(crate::Error::InvalidSessionState(other.to_string())),
        }
    }

    /// Check if the session can still receive chunks or finalise.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initiated | Self::Uploading)
    }

    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived upload progress as a percentage with at most two decimals.
pub fn progress_percent(uploaded_chunks: u64, total_chunks: u64) -> f64 {
    if total_chunks == 0 {
        return 0.0;
    }
    (uploaded_chunks as f64 / total_chunks as f64 * 10_000.0).round() / 100.0
}

/// Request to initiate an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// Original filename, including extension.
    pub filename: String,
    /// Declared media type (e.g. `image/jpeg`).
    pub mime_type: String,
    /// Declared total size in bytes.
    pub file_size: u64,
    /// Declared MD5 digest of the whole file, hex-encoded.
    pub md5_hash: String,
}

/// Response from initiating an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitiateResponse {
    /// A new session was created.
    #[serde(rename_all = "camelCase")]
    Created {
        success: bool,
        upload_id: String,
        total_chunks: u64,
        chunk_size: u64,
    },
    /// Content with this digest already exists; no session was created.
    #[serde(rename_all = "camelCase")]
    Duplicate {
        success: bool,
        duplicate: bool,
        storage_path: String,
    },
}

/// Response from receiving a chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkResponse {
    /// The chunk was staged and counted.
    #[serde(rename_all = "camelCase")]
    Accepted {
        success: bool,
        chunk_index: u64,
        uploaded_chunks: u64,
        total_chunks: u64,
        progress: f64,
    },
    /// The chunk was already staged; nothing changed.
    #[serde(rename_all = "camelCase")]
    AlreadyUploaded {
        success: bool,
        message: String,
        chunk_index: u64,
    },
}

/// Request to finalise an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub upload_id: String,
}

/// Response from finalising an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub message: String,
    pub storage_path: String,
    pub upload_id: String,
}

/// Full session view returned by the status endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub upload_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub filename: String,
    pub mime_type: String,
    pub file_size: u64,
    pub md5_hash: String,
    pub total_chunks: u64,
    pub uploaded_chunks: u64,
    pub progress: f64,
    /// Lower-case state name (`initiated`, `uploading`, ...).
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp of the last received chunk (or last update).
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Envelope for the status endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub data: SessionView,
}

/// Response from cancelling an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate(datetime!(2024-03-05 07:09:11 UTC));
        let s = id.to_string();
        assert_eq!(s.len(), 31);
        assert!(s.starts_with("20240305070911-"));
        assert_eq!(id, SessionId::parse(&s).unwrap());
    }

    #[test]
    fn test_session_id_parse_rejects_garbage() {
        assert!(SessionId::parse("not-an-id").is_err());
        assert!(SessionId::parse("20240305070911").is_err());
        assert!(SessionId::parse("2024030507091-0123456789abcdef").is_err());
        assert!(SessionId::parse("20240305070911-0123456789abcdeg").is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let now = OffsetDateTime::now_utc();
        let a = SessionId::generate(now);
        let b = SessionId::generate(now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_flags() {
        assert!(SessionState::Initiated.is_active());
        assert!(SessionState::Uploading.is_active());
        for state in [
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(!state.is_active());
        }
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            SessionState::Initiated,
            SessionState::Uploading,
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
        ] {
            assert_eq!(SessionState::parse(state.as_str()).unwrap(), state);
        }
        assert!(SessionState::parse("open").is_err());
    }

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(4, 4), 100.0);
        assert_eq!(progress_percent(0, 0), 0.0);
    }

    #[test]
    fn test_initiate_response_shapes() {
        let created = InitiateResponse::Created {
            success: true,
            upload_id: "20240305070911-0123456789abcdef".to_string(),
            total_chunks: 4,
            chunk_size: 1024 * 1024,
        };
        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["uploadId"], "20240305070911-0123456789abcdef");
        assert_eq!(json["totalChunks"], 4);

        let duplicate = InitiateResponse::Duplicate {
            success: true,
            duplicate: true,
            storage_path: "2024/03/05/anonymous/hi_x.jpg".to_string(),
        };
        let json = serde_json::to_value(&duplicate).unwrap();
        assert_eq!(json["duplicate"], true);
        assert!(json.get("uploadId").is_none());
    }
}
