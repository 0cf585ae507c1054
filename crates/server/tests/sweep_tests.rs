//! Lifecycle sweeper tests: staging expiry, object retention, and their
//! interaction with finalisation and deduplication.

mod common;

use axum::http::StatusCode;
use common::{TestServer, initiate_jpeg, jpeg_bytes, json_request, md5_hex, send_chunk};
use hopper_server::sweeper::{sweep_objects, sweep_staging};
use serde_json::json;
use std::time::{Duration, SystemTime};

/// Set a path's mtime into the past.
fn backdate(path: &std::path::Path, secs_ago: u64) {
    let past = SystemTime::now() - Duration::from_secs(secs_ago);
    let file = std::fs::File::open(path).unwrap();
    file.set_times(std::fs::FileTimes::new().set_modified(past))
        .unwrap();
}

/// Expired staging directories are swept; fresh ones survive.
#[tokio::test]
async fn test_staging_sweep_removes_expired_dirs() {
    let server = TestServer::new().await;
    let data = jpeg_bytes(64);

    let stale_id = initiate_jpeg(&server.router, "stale.jpg", &data).await;
    send_chunk(&server.router, &stale_id, 0, &data).await;

    let other = jpeg_bytes(65);
    let fresh_id = initiate_jpeg(&server.router, "fresh.jpg", &other).await;
    send_chunk(&server.router, &fresh_id, 0, &other).await;

    let stale = hopper_core::SessionId::parse(&stale_id).unwrap();
    let fresh = hopper_core::SessionId::parse(&fresh_id).unwrap();
    backdate(&server.state.staging.session_dir(&stale), 3600);

    let deleted = sweep_staging(&server.state.staging, &server.state.config.sweep)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(!server.state.staging.session_dir(&stale).exists());
    assert!(server.state.staging.session_dir(&fresh).exists());
}

/// A session whose staging was swept fails finalize with a data-loss
/// error; the session store itself is untouched by the sweep.
#[tokio::test]
async fn test_finalize_after_sweep_is_data_loss() {
    let server = TestServer::new().await;
    let data = jpeg_bytes(64);
    let upload_id = initiate_jpeg(&server.router, "doomed.jpg", &data).await;
    send_chunk(&server.router, &upload_id, 0, &data).await;

    let session_id = hopper_core::SessionId::parse(&upload_id).unwrap();
    backdate(&server.state.staging.session_dir(&session_id), 3600);
    sweep_staging(&server.state.staging, &server.state.config.sweep)
        .await
        .unwrap();

    // The session still reads as uploading: the sweeper does not touch it.
    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/api/upload/status/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(body["data"]["status"], "uploading");
    assert_eq!(body["data"]["uploadedChunks"], 1);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/upload/finalize",
        Some(json!({"uploadId": upload_id})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing"), "{body}");

    let (_, body) = json_request(
        &server.router,
        "GET",
        &format!("/api/upload/status/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(body["data"]["status"], "failed");
}

/// Objects past the retention horizon are deleted with accurate
/// accounting; the dedup index file is exempt.
#[tokio::test]
async fn test_object_sweep_respects_retention() {
    let server = TestServer::new().await;
    let data = jpeg_bytes(128);
    let upload_id = initiate_jpeg(&server.router, "aging.jpg", &data).await;
    send_chunk(&server.router, &upload_id, 0, &data).await;
    let (_, body) = json_request(
        &server.router,
        "POST",
        "/api/upload/finalize",
        Some(json!({"uploadId": upload_id})),
    )
    .await;
    let storage_path = body["storagePath"].as_str().unwrap().to_string();

    // Nothing is old enough yet.
    let stats = sweep_objects(&server.state.objects, &server.state.config.sweep)
        .await
        .unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.scanned, 1);

    // Age the stored object beyond the 30-day default.
    let full = server.state.objects.full_path(&storage_path).unwrap();
    backdate(&full, 31 * 86400);

    let stats = sweep_objects(&server.state.objects, &server.state.config.sweep)
        .await
        .unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.freed_bytes, 128);
    assert!(!server.state.objects.exists(&storage_path).await.unwrap());
    // The dedup index file survives inside the storage root.
    assert!(
        server
            .state
            .objects
            .root()
            .join("md5_index.json")
            .exists()
    );
}

/// After an object is swept, its dedup entry is stale: the same digest
/// initiates a fresh upload instead of reporting a duplicate.
#[tokio::test]
async fn test_swept_object_invalidates_dedup_entry() {
    let server = TestServer::new().await;
    let data = jpeg_bytes(96);
    let upload_id = initiate_jpeg(&server.router, "first.jpg", &data).await;
    send_chunk(&server.router, &upload_id, 0, &data).await;
    let (_, body) = json_request(
        &server.router,
        "POST",
        "/api/upload/finalize",
        Some(json!({"uploadId": upload_id})),
    )
    .await;
    let storage_path = body["storagePath"].as_str().unwrap().to_string();

    // While the object exists, the digest is a duplicate.
    let (_, body) = json_request(
        &server.router,
        "POST",
        "/api/upload/initiate",
        Some(json!({
            "filename": "again.jpg",
            "mimeType": "image/jpeg",
            "fileSize": data.len(),
            "md5Hash": md5_hex(&data),
        })),
    )
    .await;
    assert_eq!(body["duplicate"], true);

    let full = server.state.objects.full_path(&storage_path).unwrap();
    backdate(&full, 31 * 86400);
    sweep_objects(&server.state.objects, &server.state.config.sweep)
        .await
        .unwrap();

    // The stale entry no longer answers; a new session is created.
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/upload/initiate",
        Some(json!({
            "filename": "again.jpg",
            "mimeType": "image/jpeg",
            "fileSize": data.len(),
            "md5Hash": md5_hex(&data),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("duplicate").is_none(), "{body}");
    assert!(body["uploadId"].is_string());
}
