//! Prometheus metrics for the Hopper server.
//!
//! Exposes counters for upload sessions, chunk receipt, deduplication, and
//! the lifecycle sweeper, plus a finalisation latency histogram.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping;
//! restrict it to authorized scraper IPs at the infrastructure level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Session metrics
pub static SESSIONS_INITIATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_sessions_initiated_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_sessions_completed_total",
        "Total number of upload sessions finalised successfully",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_sessions_failed_total",
        "Total number of upload sessions that failed at finalisation",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_CANCELLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_sessions_cancelled_total",
        "Total number of upload sessions cancelled by the client",
    )
    .expect("metric creation failed")
});

pub static DUPLICATES_SUPPRESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_duplicates_suppressed_total",
        "Total number of initiates short-circuited by the dedup index",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_chunks_received_total",
        "Total number of chunks staged",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_REPLAYED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_chunks_replayed_total",
        "Total number of chunk uploads answered idempotently",
    )
    .expect("metric creation failed")
});

pub static BYTES_STAGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_bytes_staged_total",
        "Total chunk bytes written to staging",
    )
    .expect("metric creation failed")
});

// Finalisation metrics
pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hopper_finalize_duration_seconds",
            "Time spent reassembling, verifying, and storing an upload",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
    )
    .expect("metric creation failed")
});

// Sweeper metrics
pub static STAGING_DIRS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_staging_dirs_swept_total",
        "Total number of expired staging directories deleted",
    )
    .expect("metric creation failed")
});

pub static OBJECTS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hopper_objects_swept_total",
        "Total number of expired stored objects deleted",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent: subsequent calls after the first are no-ops, so tests that
/// build multiple routers stay safe.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SESSIONS_INITIATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_CANCELLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DUPLICATES_SUPPRESSED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_REPLAYED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STAGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FINALIZE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STAGING_DIRS_SWEPT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OBJECTS_SWEPT.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        // This would panic if any metric creation failed
        register_metrics();
    }
}
