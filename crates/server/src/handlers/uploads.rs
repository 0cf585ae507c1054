//! Upload protocol handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use hopper_core::session::{
    CancelResponse, ChunkResponse, FinalizeRequest, FinalizeResponse, InitiateRequest,
    InitiateResponse, StatusResponse,
};

/// Request header carrying the opaque owner token; absence means anonymous.
const OWNER_HEADER: &str = "x-user-id";

fn owner_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// POST /api/upload/initiate - Create an upload session.
#[tracing::instrument(skip(state, headers, req), fields(filename = %req.filename))]
pub async fn initiate_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateRequest>,
) -> ApiResult<Json<InitiateResponse>> {
    let owner = owner_from_headers(&headers);
    let response = state.manager.initiate(&req, owner).await?;
    Ok(Json(response))
}

/// POST /api/upload/chunk - Receive one chunk as multipart form data.
///
/// Expected fields: `uploadId`, `chunkIndex`, and the `chunk` payload.
#[tracing::instrument(skip_all)]
pub async fn receive_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkResponse>> {
    let mut upload_id: Option<String> = None;
    let mut chunk_index: Option<u64> = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidArgument(format!("invalid multipart request: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("uploadId") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::InvalidArgument(format!("failed to read uploadId: {e}"))
                })?;
                upload_id = Some(text);
            }
            Some("chunkIndex") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::InvalidArgument(format!("failed to read chunkIndex: {e}"))
                })?;
                let index = text.trim().parse::<u64>().map_err(|_| {
                    ApiError::InvalidArgument(format!("invalid chunkIndex: {text}"))
                })?;
                chunk_index = Some(index);
            }
            Some("chunk") => {
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::InvalidArgument(format!("failed to read chunk data: {e}"))
                })?;
                payload = Some(bytes);
            }
            // Unknown form fields are ignored.
            _ => {}
        }
    }

    let upload_id =
        upload_id.ok_or_else(|| ApiError::InvalidArgument("missing uploadId field".to_string()))?;
    let chunk_index = chunk_index
        .ok_or_else(|| ApiError::InvalidArgument("missing chunkIndex field".to_string()))?;
    let payload =
        payload.ok_or_else(|| ApiError::InvalidArgument("missing chunk field".to_string()))?;

    let response = state
        .manager
        .receive_chunk(&upload_id, chunk_index, &payload)
        .await?;
    Ok(Json(response))
}

/// POST /api/upload/finalize - Reassemble, verify, and store an upload.
#[tracing::instrument(skip(state, req), fields(upload_id = %req.upload_id))]
pub async fn finalize_upload(
    State(state): State<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> ApiResult<Json<FinalizeResponse>> {
    let storage_path = state.manager.finalize(&req.upload_id).await?;
    Ok(Json(FinalizeResponse {
        success: true,
        message: "Upload completed successfully".to_string(),
        storage_path,
        upload_id: req.upload_id,
    }))
}

/// GET /api/upload/status/{upload_id} - Report session state and progress.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let view = state.manager.status(&upload_id).await?;
    Ok(Json(StatusResponse {
        success: true,
        data: view,
    }))
}

/// POST /api/upload/cancel/{upload_id} - Cancel an in-flight session.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    state.manager.cancel(&upload_id).await?;
    Ok(Json(CancelResponse {
        success: true,
        message: "Upload cancelled".to_string(),
    }))
}
