//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hopper_core::config::AppConfig;
use hopper_metadata::{SessionStore, SqliteStore};
use hopper_server::{AppState, create_router};
use hopper_storage::{DedupIndex, JsonDedupIndex, MediaStore, StagingArea};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies on fresh temp roots.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let staging = Arc::new(
            StagingArea::new(&config.storage.staging_root)
                .await
                .expect("Failed to create staging area"),
        );
        let objects = Arc::new(
            MediaStore::new(&config.storage.storage_root)
                .await
                .expect("Failed to create object store"),
        );
        let dedup: Arc<dyn DedupIndex> = Arc::new(JsonDedupIndex::new(objects.clone()));
        let sessions: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::new(&config.metadata.path)
                .await
                .expect("Failed to create session store"),
        );

        let state = AppState::new(config, sessions, staging, objects, dedup);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }
}

/// Make a JSON request against the router and decode the JSON reply.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let request_body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(request_body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    decode_response(response).await
}

/// Send one chunk as multipart form data.
#[allow(dead_code)]
pub async fn send_chunk(
    router: &axum::Router,
    upload_id: &str,
    index: u64,
    data: &[u8],
) -> (StatusCode, Value) {
    const BOUNDARY: &str = "hopper-test-boundary";

    let mut body = Vec::new();
    push_text_field(&mut body, BOUNDARY, "uploadId", upload_id);
    push_text_field(&mut body, BOUNDARY, "chunkIndex", &index.to_string());
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"chunk\"; filename=\"blob\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/upload/chunk")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    decode_response(response).await
}

fn push_text_field(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(value.as_bytes());
    body.extend_from_slice(b"\r\n");
}

async fn decode_response(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Bytes that pass JPEG signature validation, padded to the given length.
#[allow(dead_code)]
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    assert!(len >= 3);
    let mut data = vec![0xff, 0xd8, 0xff];
    data.extend((3..len).map(|i| (i % 251) as u8));
    data
}

/// Hex MD5 of a byte slice, as clients would declare it.
#[allow(dead_code)]
pub fn md5_hex(data: &[u8]) -> String {
    hopper_core::Md5Digest::compute(data).to_hex()
}

/// Initiate a session for the given payload, returning the upload id.
#[allow(dead_code)]
pub async fn initiate_jpeg(router: &axum::Router, filename: &str, data: &[u8]) -> String {
    let (status, body) = json_request(
        router,
        "POST",
        "/api/upload/initiate",
        Some(serde_json::json!({
            "filename": filename,
            "mimeType": "image/jpeg",
            "fileSize": data.len(),
            "md5Hash": md5_hex(data),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "initiate failed: {body}");
    assert_eq!(body["success"], true, "initiate failed: {body}");
    body["uploadId"]
        .as_str()
        .unwrap_or_else(|| panic!("no uploadId in {body}"))
        .to_string()
}
