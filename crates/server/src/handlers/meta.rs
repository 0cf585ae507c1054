//! Health and configuration discovery handlers.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use hopper_metadata::SessionStore;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// Client-facing configuration surface.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
    pub chunk_size: u64,
    pub max_files: u32,
    pub max_parallel_uploads: u32,
}

/// Envelope for the config endpoint.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub success: bool,
    pub config: PublicConfig,
}

/// GET /api/upload/health - Liveness probe.
///
/// Intentionally unauthenticated for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.sessions.health_check().await?;
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| crate::error::ApiError::Internal(format!("failed to format timestamp: {e}")))?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp,
    }))
}

/// GET /api/upload/config - Advertise upload limits to clients.
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let server = &state.config.server;
    Json(ConfigResponse {
        success: true,
        config: PublicConfig {
            max_file_size: server.max_file_size,
            allowed_types: server.allowed_types.clone(),
            chunk_size: server.chunk_size,
            max_files: server.max_files,
            max_parallel_uploads: server.max_parallel_uploads,
        },
    })
}
