//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Headroom on top of the chunk size for multipart framing and the id
/// fields that travel alongside the payload.
const CHUNK_FORM_OVERHEAD: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    crate::metrics::register_metrics();

    let api_routes = Router::new()
        // Health check (intentionally unauthenticated for probes)
        .route("/health", get(handlers::health_check))
        // Client configuration discovery
        .route("/config", get(handlers::get_config))
        // Upload protocol
        .route("/initiate", post(handlers::initiate_upload))
        .route("/chunk", post(handlers::receive_chunk))
        .route("/finalize", post(handlers::finalize_upload))
        .route("/status/{upload_id}", get(handlers::get_status))
        .route("/cancel/{upload_id}", post(handlers::cancel_upload));

    let mut router = Router::new().nest("/api/upload", api_routes);

    // SECURITY: when enabled, the metrics endpoint must be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let body_limit = state.config.server.chunk_size as usize + CHUNK_FORM_OVERHEAD;

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
